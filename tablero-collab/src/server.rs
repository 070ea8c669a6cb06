//! Realtime WebSocket server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐   ?roomName=..&password=..
//!             ├── RoomSession ── RoomAuthenticator ── RoomStore (RocksDB)
//! Client B ──┘        │                                   ▲
//!                     │ mutation events                   │ read-modify-write
//!                     ▼                                   │
//!               StateMutator ── room lock ────────────────┘
//!                     │
//!                     ▼ full snapshot
//!               BroadcastHub ── BroadcastGroup(room)
//!                                   │
//!                        ┌──────────┼───────────┐
//!                        ▼          ▼           ▼
//!                     Client A   Client B    Client C
//! ```
//!
//! Each connection:
//! - authenticates once from the upgrade query string, then is bound to one room
//! - receives `init` with the room's screens
//! - sends mutation events, applied one at a time per room
//! - receives `updateScreens` after every committed mutation in its room

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::auth::RoomAuthenticator;
use crate::broadcast::{BroadcastHub, Frame};
use crate::config::ServerConfig;
use crate::locks::RoomLocks;
use crate::mutator::{MutationOutcome, RejectReason, StateMutator};
use crate::protocol::{ClientEvent, ErrorPayload, HandshakeParams, ServerEvent};
use crate::session::{RoomSession, Routed, SessionError};
use crate::storage::RoomStore;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;
type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Error code sent with `error` events.
pub const VALIDATION_FAILED: &str = "ValidationFailed";

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub committed_mutations: u64,
    pub dropped_mutations: u64,
}

/// Everything a connection task needs.
#[derive(Clone)]
struct Shared {
    authenticator: RoomAuthenticator,
    hub: Arc<BroadcastHub>,
    mutator: Arc<StateMutator>,
    stats: Arc<RwLock<ServerStats>>,
}

/// The realtime server.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<RoomStore>,
    shared: Shared,
}

impl SyncServer {
    /// Wire the realtime components around an opened store.
    pub fn new(config: ServerConfig, store: Arc<RoomStore>) -> Self {
        let locks = Arc::new(RoomLocks::new());
        let hub = Arc::new(BroadcastHub::new(
            store.clone(),
            locks.clone(),
            config.broadcast_capacity,
        ));
        let mutator = Arc::new(StateMutator::new(store.clone(), hub.clone(), locks));

        Self {
            shared: Shared {
                authenticator: RoomAuthenticator::new(store.clone()),
                hub,
                mutator,
                stats: Arc::new(RwLock::new(ServerStats::default())),
            },
            config,
            store,
        }
    }

    /// Bind the configured WebSocket address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.ws_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until the task is dropped.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` forever.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    /// The authenticator shared with the HTTP join endpoint.
    pub fn authenticator(&self) -> &RoomAuthenticator {
        &self.shared.authenticator
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.shared.hub
    }

    pub fn mutator(&self) -> &Arc<StateMutator> {
        &self.shared.mutator
    }

    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, shared: Shared) -> ConnectionResult {
    let mut query = None;
    let capture_query = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture_query).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    {
        let mut s = shared.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let result = run_session(&mut ws_sender, &mut ws_receiver, addr, query, &shared).await;

    {
        let mut s = shared.stats.write().await;
        s.active_connections -= 1;
    }
    result
}

async fn run_session(
    ws_sender: &mut WsSink,
    ws_receiver: &mut WsSource,
    addr: SocketAddr,
    query: Option<String>,
    shared: &Shared,
) -> ConnectionResult {
    let mut session = RoomSession::new();

    let params = match HandshakeParams::from_query(query.as_deref()) {
        Ok(params) => params,
        Err(e) => {
            log::warn!("Malformed handshake from {addr}: {e}");
            shared.stats.write().await.rejected_handshakes += 1;
            let payload = ErrorPayload::new(VALIDATION_FAILED, "Malformed handshake");
            return reject(ws_sender, payload).await;
        }
    };

    let room = match session.authenticate(&shared.authenticator, &params).await {
        Ok(room) => room,
        Err(SessionError::Auth(e)) => {
            log::warn!("Rejected connection from {addr}: {} ({})", e, e.code());
            shared.stats.write().await.rejected_handshakes += 1;
            return reject(ws_sender, ErrorPayload::new(e.code(), e.to_string())).await;
        }
        Err(e) => return Err(e.into()),
    };

    let membership = match shared.hub.join(&room, session.id()).await {
        Ok(membership) => membership,
        Err(e) => {
            log::error!("Error loading room {room} for {addr}: {e}");
            session.close();
            ws_sender.send(Message::Close(None)).await?;
            return Ok(());
        }
    };
    let mut broadcast_rx = membership.receiver;
    log::info!("Session {} from {addr} joined room {room}", session.id());

    let result = async {
        ws_sender
            .send(Message::text(membership.initial_state.to_string()))
            .await?;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_event(ws_sender, &mut broadcast_rx, &session, text.as_str(), addr, shared)
                                .await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            log::debug!("Ignoring binary frame from {addr}");
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                // Outgoing room state
                msg = broadcast_rx.recv() => {
                    match msg {
                        Ok(frame) => {
                            ws_sender.send(Message::text(frame.to_string())).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Session {} lagged by {n} messages, resyncing", session.id());
                            send_snapshot(ws_sender, shared, &room, &mut broadcast_rx).await?;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    }
    .await;

    shared.hub.leave(&room, session.id()).await;
    session.close();
    log::info!("Session {} left room {room}", session.id());
    result
}

/// Decode, route and apply one client event.
async fn handle_event(
    ws_sender: &mut WsSink,
    broadcast_rx: &mut broadcast::Receiver<Frame>,
    session: &RoomSession,
    text: &str,
    addr: SocketAddr,
    shared: &Shared,
) -> ConnectionResult {
    let event = match ClientEvent::decode(text) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Failed to decode event from {addr}: {e}");
            return send_error(ws_sender, "Malformed event").await;
        }
    };
    log::debug!("{} from {addr}", event.name());

    match session.route(event) {
        Ok(Routed::Mutation { room, mutation }) => {
            let outcome = shared.mutator.apply(&room, mutation).await;
            record_outcome(shared, &outcome).await;
            if let MutationOutcome::Rejected(RejectReason::Validation(message)) = outcome {
                return send_error(ws_sender, &message).await;
            }
            Ok(())
        }
        Ok(Routed::Resync { room }) => send_snapshot(ws_sender, shared, &room, broadcast_rx).await,
        Err(SessionError::Validation(message)) => {
            shared.stats.write().await.dropped_mutations += 1;
            send_error(ws_sender, &message).await
        }
        Err(e) => {
            log::warn!("Dropped event from {addr}: {e}");
            Ok(())
        }
    }
}

async fn record_outcome(shared: &Shared, outcome: &MutationOutcome) {
    let mut s = shared.stats.write().await;
    if outcome.is_committed() {
        s.committed_mutations += 1;
    } else {
        s.dropped_mutations += 1;
    }
}

/// Send one session a fresh snapshot of its room.
/// Send the current room state and drop any queued frames older than it.
async fn send_snapshot(
    ws_sender: &mut WsSink,
    shared: &Shared,
    room: &str,
    broadcast_rx: &mut broadcast::Receiver<Frame>,
) -> ConnectionResult {
    match shared.hub.resync(room, broadcast_rx).await {
        Ok(frame) => {
            ws_sender.send(Message::text(frame.to_string())).await?;
        }
        Err(e) => log::error!("Error reading state of room {room}: {e}"),
    }
    Ok(())
}

async fn send_error(ws_sender: &mut WsSink, message: &str) -> ConnectionResult {
    let event = ServerEvent::Error(ErrorPayload::new(VALIDATION_FAILED, message));
    ws_sender.send(Message::text(event.encode()?)).await?;
    Ok(())
}

/// Tell the client why it was refused and close the socket.
async fn reject(ws_sender: &mut WsSink, payload: ErrorPayload) -> ConnectionResult {
    let event = ServerEvent::ConnectError(payload);
    ws_sender.send(Message::text(event.encode()?)).await?;
    ws_sender.send(Message::Close(None)).await?;
    Ok(())
}

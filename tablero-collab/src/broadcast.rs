//! Room-scoped fan-out of full room state.
//!
//! Uses tokio broadcast channels: each room has one [`BroadcastGroup`] and
//! every joined session holds an independent receiver. A frame is encoded
//! once per broadcast and shared by all receivers through an `Arc`.
//!
//! Broadcasts are always full snapshots read from the store, never diffs
//! and never an in-memory copy. A session that misses frames (lag, transport
//! hiccup) is made whole by the next broadcast or by asking for a resync.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::locks::RoomLocks;
use crate::model::Screen;
use crate::protocol::ServerEvent;
use crate::storage::{RoomStore, StoreError};

/// Encoded frame shared by every receiver of a broadcast.
pub type Frame = Arc<str>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub active_peers: usize,
}

/// Lock-free counters updated on every send.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
        }
    }
}

/// The broadcast group of a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    /// Sessions currently joined
    peers: RwLock<HashSet<Uuid>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is the number of frames buffered per session before a
    /// slow session starts lagging.
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    /// Add a session and return its receiver.
    pub async fn add_peer(&self, session_id: Uuid) -> broadcast::Receiver<Frame> {
        let mut peers = self.peers.write().await;
        peers.insert(session_id);
        self.sender.subscribe()
    }

    /// Remove a session. Returns whether it was a member.
    pub async fn remove_peer(&self, session_id: &Uuid) -> bool {
        self.peers.write().await.remove(session_id)
    }

    /// Send a pre-encoded frame to every receiver. Returns the receiver count.
    pub fn broadcast_raw(&self, frame: Frame) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.atomic_stats
            .deliveries
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, session_id: &Uuid) -> bool {
        self.peers.read().await.contains(session_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            deliveries: self.atomic_stats.deliveries.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room name → broadcast group.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group of a room.
    pub async fn get_or_create(&self, room: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().await;
            if let Some(group) = rooms.get(room) {
                return group.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    /// Existing group of a room, without creating one.
    pub async fn get(&self, room: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Drop a room's group once its last session has left.
    pub async fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(group) = rooms.get(room) {
            if group.peer_count().await == 0 {
                rooms.remove(room);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

/// A session's membership: the receiver plus the `init` frame it must see
/// first.
pub struct Membership {
    pub receiver: broadcast::Receiver<Frame>,
    pub initial_state: Frame,
}

/// Delivers room snapshots to the sessions joined to each room.
pub struct BroadcastHub {
    store: Arc<RoomStore>,
    rooms: RoomManager,
    locks: Arc<RoomLocks>,
}

impl BroadcastHub {
    pub fn new(store: Arc<RoomStore>, locks: Arc<RoomLocks>, capacity: usize) -> Self {
        Self {
            store,
            rooms: RoomManager::new(capacity),
            locks,
        }
    }

    /// Join a session to a room's group and read its initial state.
    ///
    /// Both happen under the room lock: no mutation can commit between the
    /// snapshot and the subscription, so the first `updateScreens` a session
    /// receives is never older than its `init`.
    pub async fn join(&self, room: &str, session_id: Uuid) -> Result<Membership, StoreError> {
        let _guard = self.locks.acquire(room).await;

        let initial_state = self.snapshot_frame(room, ServerEvent::Init)?;
        let group = self.rooms.get_or_create(room).await;
        let receiver = group.add_peer(session_id).await;

        log::debug!("Session {session_id} joined group {room}");
        Ok(Membership {
            receiver,
            initial_state,
        })
    }

    /// Remove a session from its room's group.
    pub async fn leave(&self, room: &str, session_id: Uuid) {
        let _guard = self.locks.acquire(room).await;

        if let Some(group) = self.rooms.get(room).await {
            group.remove_peer(&session_id).await;
        }
        if self.rooms.remove_if_empty(room).await {
            log::debug!("Broadcast group {room} removed (empty)");
        }
    }

    /// Read the room's full state and push it to every joined session.
    ///
    /// The caller must hold the room lock. Returns the number of sessions the
    /// frame was handed to.
    pub async fn broadcast_room_state(&self, room: &str) -> Result<usize, StoreError> {
        let Some(group) = self.rooms.get(room).await else {
            return Ok(0);
        };
        let frame = self.snapshot_frame(room, ServerEvent::UpdateScreens)?;
        Ok(group.broadcast_raw(frame))
    }

    /// Recover a lagged receiver.
    ///
    /// Under the room lock the receiver is moved to the tail of the channel
    /// and a fresh snapshot is read, so every frame it yields afterwards is
    /// newer than the returned one.
    pub async fn resync(
        &self,
        room: &str,
        receiver: &mut broadcast::Receiver<Frame>,
    ) -> Result<Frame, StoreError> {
        let _guard = self.locks.acquire(room).await;

        *receiver = receiver.resubscribe();
        self.snapshot_frame(room, ServerEvent::UpdateScreens)
    }

    /// The group of a room, if any session is joined.
    pub async fn group(&self, room: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.get(room).await
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    fn snapshot_frame(
        &self,
        room: &str,
        event: fn(Vec<Screen>) -> ServerEvent,
    ) -> Result<Frame, StoreError> {
        let screens = self.store.room_screens(room)?;
        let text = event(screens)
            .encode()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Frame::from(text))
    }
}

//! One live connection's membership in a room.
//!
//! ```text
//! Connecting ──► Authenticating ──► Joined{room} ──► Closed
//!                       │
//!                       └─────────► Rejected{code}
//! ```
//!
//! The room name is fixed when the session is admitted. Mutations are always
//! routed with that name, whatever the client puts in later events.

use thiserror::Error;
use uuid::Uuid;

use crate::auth::{AuthError, RoomAuthenticator};
use crate::mutator::Mutation;
use crate::protocol::{ClientEvent, HandshakeParams};

/// Lifecycle state of a [`RoomSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Joined { room: String },
    Rejected { code: &'static str },
    Closed,
}

impl SessionState {
    fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Joined { .. } => "Joined",
            Self::Rejected { .. } => "Rejected",
            Self::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Session has not joined a room")]
    NotJoined,
    #[error("Cannot go from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("{0}")]
    Validation(String),
}

/// Where an inbound event goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Apply to the session's room through the mutator
    Mutation { room: String, mutation: Mutation },
    /// Send this session a fresh snapshot of its room
    Resync { room: String },
}

/// A single connection's view of its room.
#[derive(Debug)]
pub struct RoomSession {
    id: Uuid,
    state: SessionState,
}

impl Default for RoomSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The room this session was admitted to, while joined.
    pub fn room(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { room } => Some(room),
            _ => None,
        }
    }

    /// Run the handshake. On success the session is `Joined` and the room
    /// name is returned; on failure it is `Rejected` for good.
    pub async fn authenticate(
        &mut self,
        authenticator: &RoomAuthenticator,
        params: &HandshakeParams,
    ) -> Result<String, SessionError> {
        self.transition(SessionState::Authenticating)?;

        match authenticator
            .authenticate(params.room_name(), params.password())
            .await
        {
            Ok(()) => {
                // `authenticate` refuses a missing room name
                let room = params.room_name().unwrap_or_default().to_string();
                self.state = SessionState::Joined { room: room.clone() };
                Ok(room)
            }
            Err(e) => {
                self.state = SessionState::Rejected { code: e.code() };
                Err(e.into())
            }
        }
    }

    /// Turn a client event into work for the session's room.
    pub fn route(&self, event: ClientEvent) -> Result<Routed, SessionError> {
        let room = self.room().ok_or(SessionError::NotJoined)?.to_string();

        let mutation = match event {
            ClientEvent::RequestState => return Ok(Routed::Resync { room }),
            ClientEvent::AddComponent { screen_id, component } => {
                Mutation::AddComponent { screen_id, component }
            }
            ClientEvent::MoveComponent {
                screen_id,
                component_id,
                x_ratio,
                y_ratio,
            } => Mutation::MoveComponent {
                screen_id,
                component_id,
                x_ratio,
                y_ratio,
            },
            ClientEvent::DeleteComponent {
                screen_id,
                component_id,
            } => Mutation::DeleteComponent {
                screen_id,
                component_id,
            },
            ClientEvent::AddScreen(screen) => Mutation::AddScreen(screen),
            ClientEvent::DeleteScreen(screen_id) => Mutation::DeleteScreen(screen_id),
            ClientEvent::RenameScreen {
                screen_id,
                new_name,
            } => Mutation::RenameScreen {
                screen_id,
                new_name,
            },
            ClientEvent::ChangeDevice { screen_id, device } => {
                Mutation::ChangeDevice { screen_id, device }
            }
        };

        mutation.validate().map_err(SessionError::Validation)?;
        Ok(Routed::Mutation { room, mutation })
    }

    /// Mark the connection as gone. Idempotent.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        let allowed = matches!(
            (&self.state, &next),
            (SessionState::Connecting, SessionState::Authenticating)
        );
        if !allowed {
            return Err(SessionError::InvalidTransition {
                from: self.state.label(),
                to: next.label(),
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Component;
    use crate::storage::{RoomStore, StoreConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn authenticator() -> (RoomAuthenticator, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(RoomStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
        store.create_room("demo", None).unwrap();
        let hash = crate::auth::hash_password("x123", 4).await.unwrap();
        store.create_room("secure", Some(hash)).unwrap();
        (RoomAuthenticator::new(store), dir)
    }

    #[tokio::test]
    async fn test_join_fixes_room() {
        let (auth, _dir) = authenticator().await;
        let mut session = RoomSession::new();
        assert_eq!(session.state(), &SessionState::Connecting);

        let room = session
            .authenticate(&auth, &HandshakeParams::new("demo", None))
            .await
            .unwrap();
        assert_eq!(room, "demo");
        assert_eq!(session.room(), Some("demo"));
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let (auth, _dir) = authenticator().await;
        let mut session = RoomSession::new();

        let err = session
            .authenticate(&auth, &HandshakeParams::new("secure", None))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Auth(AuthError::PasswordRequired));
        assert_eq!(
            session.state(),
            &SessionState::Rejected { code: "PasswordRequired" }
        );

        let retry = session
            .authenticate(&auth, &HandshakeParams::new("secure", Some("x123")))
            .await;
        assert!(matches!(retry, Err(SessionError::InvalidTransition { .. })));
        assert_eq!(session.room(), None);
    }

    #[tokio::test]
    async fn test_cannot_authenticate_twice() {
        let (auth, _dir) = authenticator().await;
        let mut session = RoomSession::new();
        session
            .authenticate(&auth, &HandshakeParams::new("demo", None))
            .await
            .unwrap();
        let again = session
            .authenticate(&auth, &HandshakeParams::new("secure", Some("x123")))
            .await;
        assert_eq!(
            again,
            Err(SessionError::InvalidTransition {
                from: "Joined",
                to: "Authenticating"
            })
        );
        assert_eq!(session.room(), Some("demo"));
    }

    #[tokio::test]
    async fn test_route_uses_session_room() {
        let (auth, _dir) = authenticator().await;
        let mut session = RoomSession::new();
        session
            .authenticate(&auth, &HandshakeParams::new("demo", None))
            .await
            .unwrap();

        let routed = session
            .route(ClientEvent::AddComponent {
                screen_id: 4,
                component: Component::new("c1", 0.1, 0.1),
            })
            .unwrap();
        assert_eq!(
            routed,
            Routed::Mutation {
                room: "demo".into(),
                mutation: Mutation::AddComponent {
                    screen_id: 4,
                    component: Component::new("c1", 0.1, 0.1),
                },
            }
        );

        assert_eq!(
            session.route(ClientEvent::RequestState).unwrap(),
            Routed::Resync { room: "demo".into() }
        );
    }

    #[tokio::test]
    async fn test_route_validates() {
        let (auth, _dir) = authenticator().await;
        let mut session = RoomSession::new();
        session
            .authenticate(&auth, &HandshakeParams::new("demo", None))
            .await
            .unwrap();

        let result = session.route(ClientEvent::MoveComponent {
            screen_id: 1,
            component_id: "c1".into(),
            x_ratio: -0.1,
            y_ratio: 0.5,
        });
        assert!(matches!(result, Err(SessionError::Validation(_))));
    }

    #[test]
    fn test_route_requires_join() {
        let session = RoomSession::new();
        assert_eq!(
            session.route(ClientEvent::RequestState),
            Err(SessionError::NotJoined)
        );
    }

    #[test]
    fn test_close() {
        let mut session = RoomSession::new();
        session.close();
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(session.route(ClientEvent::RequestState), Err(SessionError::NotJoined));
    }
}

//! Room admission.
//!
//! One policy, used both by the WebSocket handshake and by the HTTP join
//! endpoint:
//!
//! 1. the room must exist;
//! 2. an open room (no stored hash) admits any password, including none;
//! 3. a protected room with no supplied password fails with
//!    `PasswordRequired` without hashing anything;
//! 4. otherwise the password is checked with bcrypt.

use std::sync::Arc;
use thiserror::Error;

use crate::storage::{RoomStore, StoreError};

/// Default bcrypt work factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Why a join attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Room name is required")]
    MissingRoomName,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Password required")]
    PasswordRequired,
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Authentication error")]
    Internal(String),
}

impl AuthError {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingRoomName => "ValidationFailed",
            Self::RoomNotFound => "RoomNotFound",
            Self::PasswordRequired => "PasswordRequired",
            Self::InvalidPassword => "InvalidPassword",
            Self::Internal(_) => "AuthInternalError",
        }
    }
}

/// Validates join attempts against the store.
#[derive(Clone)]
pub struct RoomAuthenticator {
    store: Arc<RoomStore>,
}

impl RoomAuthenticator {
    pub fn new(store: Arc<RoomStore>) -> Self {
        Self { store }
    }

    /// Check whether `password` admits the caller into `room_name`.
    ///
    /// Empty strings count as absent for both arguments.
    pub async fn authenticate(
        &self,
        room_name: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), AuthError> {
        let room_name = room_name
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingRoomName)?;
        let password = password.filter(|s| !s.is_empty());

        let hash = match self.store.get_room_password_hash(room_name) {
            Ok(hash) => hash,
            Err(StoreError::RoomNotFound(_)) => return Err(AuthError::RoomNotFound),
            Err(e) => {
                log::error!("Password lookup failed for room {room_name}: {e}");
                return Err(AuthError::Internal(e.to_string()));
            }
        };

        let Some(hash) = hash else {
            return Ok(());
        };
        let Some(password) = password else {
            return Err(AuthError::PasswordRequired);
        };

        if verify_password(password, &hash).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidPassword)
        }
    }
}

/// Hash a room password off the async runtime.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .map_err(|e| AuthError::Internal(e.to_string()))
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .map_err(|e| {
            log::error!("Stored password hash is unusable: {e}");
            AuthError::Internal(e.to_string())
        })
}

//! Per-room mutual exclusion.
//!
//! Every mutation of a room's screens, the broadcast that follows it, and the
//! subscribe-then-snapshot step of a joining session run while holding that
//! room's lock. Locks for different rooms are independent, so rooms never
//! wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Room name → async mutex.
#[derive(Default)]
pub struct RoomLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl RoomLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `room`.
    ///
    /// The guard is owned so it can be held across awaits and moved between
    /// helpers.
    pub async fn acquire(&self, room: &str) -> OwnedMutexGuard<()> {
        self.lock_for(room).await.lock_owned().await
    }

    /// Get or create the mutex of a room.
    async fn lock_for(&self, room: &str) -> Arc<Mutex<()>> {
        // Fast path: read lock
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(room) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of rooms that have had a lock created.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}

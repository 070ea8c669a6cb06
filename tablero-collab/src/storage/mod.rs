//! Persistent storage for rooms and screens.
//!
//! ```text
//! ┌──────────────┐   reads/writes   ┌──────────────────────────────────┐
//! │ StateMutator │ ───────────────► │ RoomStore (RocksDB)              │
//! │ BroadcastHub │                  │  CF "rooms"    — room records    │
//! │ Authenticator│                  │  CF "room_ids" — id → name       │
//! └──────────────┘                  │  CF "screens"  — screens (LZ4)   │
//!                                   │  CF "meta"     — id counters     │
//!                                   └──────────────────────────────────┘
//! ```
//!
//! The store is the only component that touches disk. It is opened once at
//! startup and handed to every component that needs it.

pub mod records;
pub mod rocks;

pub use records::{RoomRecord, ScreenRecord};
pub use rocks::{RoomStore, StoreConfig, StoreError};

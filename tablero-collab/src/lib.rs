//! # tablero-collab — Real-time room synchronization for Tablero
//!
//! Clients join named, optionally password-protected rooms and edit the
//! room's screens together. Every committed edit is persisted and the full
//! room state is pushed to everyone in the room.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket (JSON)  ┌──────────────┐
//! │   Client    │ ◄─────────────────► │  SyncServer  │
//! │  (browser)  │                     │ RoomSession  │
//! └─────────────┘                     └──────┬───────┘
//!        │ HTTP                              │ mutations
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌──────────────┐  room lock
//! │  http API   │                     │ StateMutator │ ◄──────────
//! └──────┬──────┘                     └──────┬───────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────────────────────┐     ┌──────────────┐
//! │     RoomStore (RocksDB)     │ ◄── │ BroadcastHub │
//! └─────────────────────────────┘     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — Rooms, screens, components
//! - [`storage`] — RocksDB-backed room store
//! - [`auth`] — Room password policy
//! - [`locks`] — Per-room mutual exclusion
//! - [`broadcast`] — Room-scoped fan-out of full snapshots
//! - [`mutator`] — Serialized read-modify-write of room state
//! - [`session`] — Per-connection state machine
//! - [`protocol`] — JSON wire events
//! - [`server`] — WebSocket server
//! - [`http`] — Room list/create/join API
//! - [`config`] — Environment-driven configuration

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod http;
pub mod locks;
pub mod model;
pub mod mutator;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use auth::{AuthError, RoomAuthenticator};
pub use broadcast::{BroadcastGroup, BroadcastHub, BroadcastStats, RoomManager};
pub use config::{ConfigError, ServerConfig};
pub use http::{router, ApiError, ApiState};
pub use locks::RoomLocks;
pub use model::{Component, ComponentId, Device, NewScreen, RoomSummary, Screen};
pub use mutator::{Mutation, MutationOutcome, RejectReason, StateMutator};
pub use protocol::{ClientEvent, ErrorPayload, HandshakeParams, ProtocolError, ServerEvent};
pub use server::{ServerStats, SyncServer};
pub use session::{RoomSession, SessionError, SessionState};
pub use storage::{RoomStore, StoreConfig, StoreError};

//! JSON wire protocol of the realtime channel.
//!
//! Wire format (one WebSocket text frame per event):
//! ```text
//! { "event": "<name>", "data": <payload> }
//! ```
//!
//! Client → server: `addComponent`, `moveComponent`, `deleteComponent`,
//! `addScreen`, `deleteScreen`, `renameScreen`, `changeDevice`,
//! `requestState`.
//!
//! Server → client: `init`, `updateScreens`, `connect_error`, `error`.
//!
//! The handshake carries `roomName` and `password` in the query string of
//! the upgrade request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Component, ComponentId, Device, NewScreen, Screen, ScreenId};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    AddComponent {
        screen_id: ScreenId,
        component: Component,
    },
    MoveComponent {
        screen_id: ScreenId,
        component_id: ComponentId,
        x_ratio: f64,
        y_ratio: f64,
    },
    DeleteComponent {
        screen_id: ScreenId,
        component_id: ComponentId,
    },
    AddScreen(NewScreen),
    /// Payload is the bare screen id
    DeleteScreen(ScreenId),
    RenameScreen {
        screen_id: ScreenId,
        new_name: String,
    },
    ChangeDevice {
        screen_id: ScreenId,
        device: Device,
    },
    /// Ask for a fresh full snapshot, delivered to the requester only
    RequestState,
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Event name as it appears on the wire (for logging).
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddComponent { .. } => "addComponent",
            Self::MoveComponent { .. } => "moveComponent",
            Self::DeleteComponent { .. } => "deleteComponent",
            Self::AddScreen(_) => "addScreen",
            Self::DeleteScreen(_) => "deleteScreen",
            Self::RenameScreen { .. } => "renameScreen",
            Self::ChangeDevice { .. } => "changeDevice",
            Self::RequestState => "requestState",
        }
    }
}

/// `{code, message}` body of `connect_error` and `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full screen list, once, to a session that just joined
    #[serde(rename = "init")]
    Init(Vec<Screen>),
    /// Full screen list after a committed mutation
    #[serde(rename = "updateScreens")]
    UpdateScreens(Vec<Screen>),
    /// Handshake rejected; the socket is closed right after
    #[serde(rename = "connect_error")]
    ConnectError(ErrorPayload),
    /// An event from this session could not be accepted
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Query parameters of the WebSocket upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    pub room_name: Option<String>,
    pub password: Option<String>,
}

impl HandshakeParams {
    pub fn new(room_name: impl Into<String>, password: Option<&str>) -> Self {
        Self {
            room_name: Some(room_name.into()),
            password: password.map(str::to_string),
        }
    }

    /// Parse `roomName=..&password=..`; a missing query yields empty params.
    pub fn from_query(query: Option<&str>) -> Result<Self, ProtocolError> {
        match query {
            Some(q) if !q.is_empty() => serde_urlencoded::from_str(q)
                .map_err(|e| ProtocolError::Handshake(e.to_string())),
            _ => Ok(Self::default()),
        }
    }

    /// Room name, if present and non-empty.
    pub fn room_name(&self) -> Option<&str> {
        self.room_name.as_deref().filter(|s| !s.is_empty())
    }

    /// Password, if present and non-empty.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|s| !s.is_empty())
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Malformed event: {0}")]
    Malformed(String),
    #[error("Malformed handshake: {0}")]
    Handshake(String),
}

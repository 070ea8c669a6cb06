//! Rooms, screens and positioned components.
//!
//! These are the shapes both persisted by [`crate::storage`] and carried on
//! the wire by [`crate::protocol`]. Component and device payloads are opaque
//! JSON objects: the server only interprets `id`, `xRatio` and `yRatio` on a
//! component and requires `name`/`width`/`height` on a device, and
//! round-trips every value untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Display name of the screen inserted together with every new room.
pub const DEFAULT_SCREEN_NAME: &str = "Pantalla 1";

pub type RoomId = u64;
pub type ScreenId = u64;

/// Room as listed by the room API (`{id, name}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
}

/// Device a screen is designed for. Always replaced as a whole.
///
/// Dimensions are kept as the client sent them (`375`, `375.5`, `"375"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub width: Value,
    pub height: Value,
    /// Extra client-defined properties (orientation, scale, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width: Value::from(width),
            height: Value::from(height),
            extra: Map::new(),
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new("iPhone 14", 375, 667)
    }
}

/// Caller-supplied component identifier.
///
/// Clients pick their own ids (strings or numbers); equality is strict JSON
/// equality, so `"1"` and `1` are different components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub Value);

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

impl From<String> for ComponentId {
    fn from(id: String) -> Self {
        Self(Value::String(id))
    }
}

impl From<u64> for ComponentId {
    fn from(id: u64) -> Self {
        Self(Value::from(id))
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// A positioned UI element on a screen.
///
/// Position is stored as a fraction of the screen's dimensions so that the
/// same layout renders on any resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    #[serde(rename = "xRatio", default)]
    pub x_ratio: f64,
    #[serde(rename = "yRatio", default)]
    pub y_ratio: f64,
    /// Type and properties, opaque to the server
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl Component {
    pub fn new(id: impl Into<ComponentId>, x_ratio: f64, y_ratio: f64) -> Self {
        Self {
            id: id.into(),
            x_ratio,
            y_ratio,
            props: Map::new(),
        }
    }

    /// Attach an opaque property (builder style).
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Whether the component has a usable id and an on-screen position.
    pub fn is_valid(&self) -> bool {
        !self.id.0.is_null() && is_unit_ratio(self.x_ratio) && is_unit_ratio(self.y_ratio)
    }
}

/// `true` if `value` is a finite number in `[0, 1]`.
pub fn is_unit_ratio(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// A screen as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: ScreenId,
    pub name: String,
    pub device: Device,
    pub components: Vec<Component>,
}

/// Payload of an `addScreen` request; the id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScreen {
    pub name: String,
    pub device: Device,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl NewScreen {
    pub fn new(name: impl Into<String>, device: Device) -> Self {
        Self {
            name: name.into(),
            device,
            components: Vec::new(),
        }
    }

    /// The screen every room starts with.
    pub fn room_default() -> Self {
        Self::new(DEFAULT_SCREEN_NAME, Device::default())
    }
}

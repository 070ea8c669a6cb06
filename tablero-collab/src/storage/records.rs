//! On-disk record formats.
//!
//! - Room records are bincode-encoded (fixed, schema-owned shape).
//! - Screen records are JSON, LZ4-compressed: component payloads are
//!   arbitrary client JSON, which needs a self-describing encoding.
//!
//! Key layout:
//! ```text
//! rooms   : <room name bytes>                       → RoomRecord
//! screens : <room_id:8 BE><screen_id:8 BE>          → ScreenRecord
//! meta    : "next_room_id" | "next_screen_id"       → u64 BE
//! ```

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::model::{Component, Device, RoomId, RoomSummary, Screen, ScreenId};

/// Persisted room row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    /// bcrypt hash; `None` = open room
    pub password_hash: Option<String>,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

impl RoomRecord {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(record)
    }
}

/// Persisted screen row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRecord {
    pub id: ScreenId,
    pub room_id: RoomId,
    pub name: String,
    pub device: Device,
    pub components: Vec<Component>,
}

impl ScreenRecord {
    pub fn into_screen(self) -> Screen {
        Screen {
            id: self.id,
            name: self.name,
            device: self.device,
            components: self.components,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let json =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&json))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let json = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

/// Key prefix shared by every screen of a room.
pub(crate) fn room_prefix(room_id: RoomId) -> [u8; 8] {
    room_id.to_be_bytes()
}

/// Screen key: room id (8 bytes BE) + screen id (8 bytes BE).
pub(crate) fn screen_key(room_id: RoomId, screen_id: ScreenId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&room_id.to_be_bytes());
    key[8..].copy_from_slice(&screen_id.to_be_bytes());
    key
}

pub(crate) fn decode_counter(bytes: &[u8]) -> Result<u64, StoreError> {
    let buf: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Deserialization("Invalid counter value".into()))?;
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_record_roundtrip() {
        let record = RoomRecord {
            id: 7,
            name: "secure".into(),
            password_hash: Some("$2b$04$abc".into()),
            created_at: 1_700_000_000_000,
        };
        let decoded = RoomRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.summary(), RoomSummary { id: 7, name: "secure".into() });
    }

    #[test]
    fn test_screen_record_compresses_repetitive_components() {
        let components: Vec<Component> = (0..200)
            .map(|i| {
                Component::new(format!("c{i}"), 0.5, 0.5)
                    .with_prop("type", "button")
                    .with_prop("label", "Aceptar")
            })
            .collect();
        let record = ScreenRecord {
            id: 1,
            room_id: 1,
            name: "Pantalla 1".into(),
            device: Device::default(),
            components,
        };
        let json_len = serde_json::to_vec(&record).unwrap().len();
        let encoded = record.encode().unwrap();
        assert!(encoded.len() * 2 < json_len, "{} vs {json_len}", encoded.len());

        let decoded = ScreenRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_screen_keys_sort_by_room_then_screen() {
        assert!(screen_key(1, 99) < screen_key(2, 0));
        assert!(screen_key(2, 3) < screen_key(2, 10));
        assert_eq!(&screen_key(5, 9)[..8], &room_prefix(5));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(ScreenRecord::decode(&[0xFF, 0x00, 0x01]).is_err());
        assert!(decode_counter(&[1, 2, 3]).is_err());
    }
}

//! Server configuration.
//!
//! Defaults can be overridden with environment variables:
//!
//! - `TABLERO_WS_ADDR`            (default: "127.0.0.1:9090")
//! - `TABLERO_HTTP_ADDR`          (default: "0.0.0.0:$PORT", PORT defaulting to 3000)
//! - `TABLERO_DATA_DIR`           (default: "tablero_data")
//! - `TABLERO_BROADCAST_CAPACITY` (default: 256)
//! - `TABLERO_BCRYPT_COST`        (default: 10)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::auth::DEFAULT_BCRYPT_COST;
use crate::storage::StoreConfig;

const DEFAULT_HTTP_PORT: u16 = 3000;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the realtime WebSocket listener
    pub ws_addr: String,
    /// Address of the HTTP room API
    pub http_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// bcrypt work factor for new room passwords
    pub bcrypt_cost: u32,
    /// Persistent store settings
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:9090".to_string(),
            http_addr: format!("0.0.0.0:{DEFAULT_HTTP_PORT}"),
            broadcast_capacity: 256,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let ws_addr = lookup("TABLERO_WS_ADDR").unwrap_or(defaults.ws_addr);
        let http_addr = match lookup("TABLERO_HTTP_ADDR") {
            Some(addr) => addr,
            None => {
                let port = parse_or_default(&lookup, "PORT", DEFAULT_HTTP_PORT)?;
                format!("0.0.0.0:{port}")
            }
        };
        let broadcast_capacity = parse_or_default(
            &lookup,
            "TABLERO_BROADCAST_CAPACITY",
            defaults.broadcast_capacity,
        )?;
        if broadcast_capacity == 0 {
            return Err(invalid("TABLERO_BROADCAST_CAPACITY", "0", "must be positive"));
        }
        let bcrypt_cost = parse_or_default(&lookup, "TABLERO_BCRYPT_COST", defaults.bcrypt_cost)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(invalid(
                "TABLERO_BCRYPT_COST",
                &bcrypt_cost.to_string(),
                "must be between 4 and 31",
            ));
        }

        let mut store = defaults.store;
        if let Some(dir) = lookup("TABLERO_DATA_DIR") {
            store.path = PathBuf::from(dir);
        }

        Ok(Self {
            ws_addr,
            http_addr,
            broadcast_capacity,
            bcrypt_cost,
            store,
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &value, &e.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.ws_addr, "127.0.0.1:9090");
        assert_eq!(config.http_addr, "0.0.0.0:3000");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.bcrypt_cost, 10);
        assert_eq!(config.store.path, PathBuf::from("tablero_data"));
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.ws_addr, "127.0.0.1:9090");
        assert_eq!(config.http_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("TABLERO_WS_ADDR", "0.0.0.0:7000"),
            ("PORT", "8080"),
            ("TABLERO_DATA_DIR", "/var/lib/tablero"),
            ("TABLERO_BROADCAST_CAPACITY", "32"),
            ("TABLERO_BCRYPT_COST", "12"),
        ])
        .unwrap();
        assert_eq!(config.ws_addr, "0.0.0.0:7000");
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.store.path, PathBuf::from("/var/lib/tablero"));
        assert_eq!(config.broadcast_capacity, 32);
        assert_eq!(config.bcrypt_cost, 12);
    }

    #[test]
    fn test_http_addr_wins_over_port() {
        let config = from_pairs(&[("TABLERO_HTTP_ADDR", "127.0.0.1:4000"), ("PORT", "8080")])
            .unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:4000");
    }

    #[test]
    fn test_invalid_values() {
        let err = from_pairs(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "PORT"));

        assert!(from_pairs(&[("TABLERO_BROADCAST_CAPACITY", "0")]).is_err());
        assert!(from_pairs(&[("TABLERO_BCRYPT_COST", "3")]).is_err());
        assert!(from_pairs(&[("TABLERO_BCRYPT_COST", "-1")]).is_err());
    }
}

//! Configuration system.
//!
//! Loads client configuration from JSON strings/files. Every field has a
//! default so partial files are accepted.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Authority address, e.g. `127.0.0.1:5000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Display name announced in the session context.
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Consecutive automatic reconnection attempts allowed before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Link establishment timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Token layout parameters.
    #[serde(default)]
    pub layout: LayoutConfig,
}

/// Grid parameters used when decluttering tokens on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub cell_size: f32,
    pub token_width: f32,
    pub token_height: f32,
    /// How far from its station a token may be moved.
    pub max_distance: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            token_width: 10.0,
            token_height: 10.0,
            max_distance: 100.0,
        }
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            player_name: default_player_name(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            layout: LayoutConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ClientConfig::from_json_str(r#"{ "server_addr": "10.0.0.2:7000" }"#).unwrap();
        assert_eq!(cfg.server_addr, "10.0.0.2:7000");
        assert_eq!(cfg.player_name, "Player");
        assert_eq!(cfg.max_reconnect_attempts, 3);
        assert_eq!(cfg.layout, LayoutConfig::default());
    }

    #[test]
    fn layout_section_overrides() {
        let cfg = ClientConfig::from_json_str(
            r#"{ "layout": { "cell_size": 4, "token_width": 8, "token_height": 8, "max_distance": 40 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.layout.cell_size, 4.0);
        assert_eq!(cfg.layout.max_distance, 40.0);
    }
}

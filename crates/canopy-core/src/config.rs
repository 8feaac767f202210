//! Configuration system for Canopy.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CANOPY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/canopy/config.toml
//!   3. ~/.config/canopy/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex secp256k1 private key. Auto-generated on first run.
    pub signing_key_path: PathBuf,
    /// Hex X25519 private key. Auto-generated on first run.
    pub encrypting_key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address to accept peer connections on.
    pub listen_addr: String,
    /// Peers to dial. Each one is a candidate provider for every URL.
    pub peers: Vec<String>,
    /// Seconds to wait for a handshake reply before failing the exchange.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Per-peer bound on remembered tx hashes. Evicted entries only cost a
    /// redundant re-send.
    pub seen_capacity_per_peer: usize,
    /// URLs to subscribe to at start-up.
    pub subscriptions: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Default TCP listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:21231";

/// Default handshake timeout in seconds.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

/// Default per-peer seen-set capacity.
pub const SEEN_CAPACITY_PER_PEER: usize = 4096;

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            signing_key_path: config_dir().join("signing.key"),
            encrypting_key_path: config_dir().join("encrypting.key"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            peers: Vec::new(),
            handshake_timeout_secs: HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            seen_capacity_per_peer: SEEN_CAPACITY_PER_PEER,
            subscriptions: Vec::new(),
        }
    }
}

impl NetworkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("canopy")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CanopyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a specific file, falling back to defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(CanopyConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CANOPY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CanopyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CANOPY_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CANOPY_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = lookup("CANOPY_NETWORK__PEERS") {
            self.network.peers = split_list(&v);
        }
        if let Some(v) = lookup("CANOPY_NETWORK__HANDSHAKE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.network.handshake_timeout_secs = secs;
            }
        }
        if let Some(v) = lookup("CANOPY_HOST__SUBSCRIPTIONS") {
            self.host.subscriptions = split_list(&v);
        }
        if let Some(v) = lookup("CANOPY_HOST__SEEN_CAPACITY_PER_PEER") {
            if let Ok(n) = v.parse() {
                self.host.seen_capacity_per_peer = n;
            }
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_sane() {
        let config = CanopyConfig::default();
        assert_eq!(config.network.listen_addr, DEFAULT_LISTEN_ADDR);
        assert!(config.network.peers.is_empty());
        assert_eq!(config.host.seen_capacity_per_peer, SEEN_CAPACITY_PER_PEER);
        assert_eq!(config.network.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn env_overrides_replace_lists() {
        let env: HashMap<&str, &str> = [
            ("CANOPY_NETWORK__PEERS", "127.0.0.1:1, 127.0.0.1:2,"),
            ("CANOPY_HOST__SUBSCRIPTIONS", "chat/room1"),
            ("CANOPY_HOST__SEEN_CAPACITY_PER_PEER", "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = CanopyConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.network.peers, vec!["127.0.0.1:1", "127.0.0.1:2"]);
        assert_eq!(config.host.subscriptions, vec!["chat/room1"]);
        assert_eq!(config.host.seen_capacity_per_peer, SEEN_CAPACITY_PER_PEER);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = std::env::temp_dir().join(format!("canopy-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let path = tmp.join("config.toml");
        std::fs::write(&path, "[host]\nsubscriptions = [\"chat/room1\"]\n").unwrap();

        let config = CanopyConfig::load_file(&path).expect("load should succeed");
        assert_eq!(config.host.subscriptions, vec!["chat/room1"]);
        assert_eq!(config.host.seen_capacity_per_peer, SEEN_CAPACITY_PER_PEER);
        assert_eq!(config.network.listen_addr, DEFAULT_LISTEN_ADDR);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = CanopyConfig::load_file(std::path::Path::new("/nonexistent/canopy.toml")).unwrap();
        assert!(config.host.subscriptions.is_empty());
    }

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&CanopyConfig::default()).unwrap();
        let parsed: CanopyConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.listen_addr, DEFAULT_LISTEN_ADDR);
    }
}

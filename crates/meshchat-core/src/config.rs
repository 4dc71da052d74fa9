//! Configuration system for meshchat.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags are applied on top by the binaries.
//!
//! Config file location:
//!   1. $MESHCHAT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshchat/config.toml
//!   3. ~/.config/meshchat/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshchatConfig {
    pub identity: IdentityConfig,
    pub registry: RegistryConfig,
    pub peer: PeerConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Peer id. Empty = must be supplied with `--peer`.
    pub peer_id: String,
    /// Channel joined at startup.
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL peers use to reach the registry.
    pub url: String,
    /// Bind address when running the registry itself.
    pub listen_ip: String,
    pub port: u16,
    /// Capability cookie, `name=value`.
    pub cookie: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub listen_ip: String,
    /// TCP port for mesh links. 0 = OS-assigned.
    pub listen_port: u16,
    /// Address other peers should dial. Empty = listen_ip.
    pub advertise_ip: String,
    pub bridge_host: String,
    /// Local UI bridge port. 0 = bridge disabled.
    pub bridge_port: u16,
    /// Directory holding chat.html and its assets.
    pub ui_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub discovery_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Window an inbound link has to send `hello` before it is dropped.
    pub hello_timeout_ms: u64,
    pub http_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_COOKIE: &str = "auth=true";

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            channel: "room".to_string(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9000".to_string(),
            listen_ip: "127.0.0.1".to_string(),
            port: 9000,
            cookie: DEFAULT_COOKIE.to_string(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_ip: "127.0.0.1".to_string(),
            listen_port: 5001,
            advertise_ip: String::new(),
            bridge_host: "127.0.0.1".to_string(),
            bridge_port: 7000,
            ui_root: PathBuf::from("."),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: 2_000,
            connect_timeout_ms: 3_000,
            hello_timeout_ms: 10_000,
            http_timeout_ms: 10_000,
        }
    }
}

impl PeerConfig {
    pub fn advertised_ip(&self) -> &str {
        if self.advertise_ip.is_empty() {
            &self.listen_ip
        } else {
            &self.advertise_ip
        }
    }
}

impl TimingConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("meshchat")
}

fn home_dir() -> PathBuf {
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

impl MeshchatConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a specific file, falling back to defaults when it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHCHAT_CONFIG")
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
            let text = toml::to_string_pretty(&MeshchatConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHCHAT_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MESHCHAT_IDENTITY__PEER_ID") {
            self.identity.peer_id = v;
        }
        if let Some(v) = lookup("MESHCHAT_IDENTITY__CHANNEL") {
            self.identity.channel = v;
        }
        if let Some(v) = lookup("MESHCHAT_REGISTRY__URL") {
            self.registry.url = v;
        }
        if let Some(v) = lookup("MESHCHAT_REGISTRY__COOKIE") {
            self.registry.cookie = v;
        }
        if let Some(p) = lookup("MESHCHAT_PEER__LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.peer.listen_port = p;
        }
        if let Some(p) = lookup("MESHCHAT_PEER__BRIDGE_PORT").and_then(|v| v.parse().ok()) {
            self.peer.bridge_port = p;
        }
    }
}

//! Configuration system for hashfall.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HASHFALL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hashfall/config.toml
//!   3. ~/.config/hashfall/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::actor_path::{ActorPath, NodeAddress};
use crate::protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW, ENVELOPE_HEADROOM};
use crate::wire::DEFAULT_MAX_FRAME_BYTES;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HashfallConfig {
    pub node: NodeConfig,
    pub transport: TransportConfig,
    pub large_message: LargeMessageConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Actor system name; part of every actor path on this node.
    pub system: String,
    /// Host peers use to reach this node.
    pub host: String,
    /// TCP port for frames.
    pub port: u16,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Hard ceiling for one frame, header included.
    pub max_frame_bytes: usize,
    /// TCP connect timeout for outbound links.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeMessageConfig {
    /// Chunk payload bound in bytes.
    pub chunk_size: usize,
    /// Unacknowledged chunks allowed in flight per session.
    pub window: usize,
    /// Bounded wait for locating the peer proxy.
    pub resolve_timeout_ms: u64,
    /// Resolution attempts before a send is abandoned. Minimum 1.
    pub resolve_attempts: u32,
    /// Backoff before the second attempt; doubled for each further one.
    pub resolve_backoff_ms: u64,
    /// Sessions with no traffic for this long are expired.
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Master actor a worker registers with.
    pub master: Option<ActorPath>,
    /// Password file the master reads.
    pub input_path: PathBuf,
    /// Worker actors spawned on this node.
    pub local_workers: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            system: "ddm".to_string(),
            host: "127.0.0.1".to_string(),
            port: 7877,
            role: Role::Master,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout_ms: 3_000,
        }
    }
}

impl Default for LargeMessageConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window: DEFAULT_WINDOW,
            resolve_timeout_ms: 5_000,
            resolve_attempts: 3,
            resolve_backoff_ms: 250,
            idle_timeout_secs: 60,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master: None,
            input_path: PathBuf::from("data/passwords.csv"),
            local_workers: 2,
        }
    }
}

impl NodeConfig {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.system.clone(), self.host.clone(), self.port)
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl LargeMessageConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn resolve_backoff(&self) -> Duration {
        Duration::from_millis(self.resolve_backoff_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hashfall")
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
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HashfallConfig {
    /// Load config: env vars → file → defaults, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            HashfallConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HASHFALL_CONFIG")
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
            let text = toml::to_string_pretty(&HashfallConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the transport cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lm = &self.large_message;
        if lm.chunk_size == 0 {
            return Err(ConfigError::Invalid("large_message.chunk_size must be > 0".into()));
        }
        if lm.window == 0 {
            return Err(ConfigError::Invalid("large_message.window must be > 0".into()));
        }
        if lm.resolve_attempts == 0 {
            return Err(ConfigError::Invalid(
                "large_message.resolve_attempts must be >= 1".into(),
            ));
        }
        if lm.resolve_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "large_message.resolve_timeout_ms must be > 0".into(),
            ));
        }
        if lm.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "large_message.idle_timeout_secs must be > 0".into(),
            ));
        }
        if lm.chunk_size + ENVELOPE_HEADROOM > self.transport.max_frame_bytes {
            return Err(ConfigError::Invalid(format!(
                "chunk_size {} plus {} bytes of envelope headroom exceeds max_frame_bytes {}",
                lm.chunk_size, ENVELOPE_HEADROOM, self.transport.max_frame_bytes
            )));
        }
        Ok(())
    }

    /// Apply HASHFALL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HASHFALL_NODE__SYSTEM") {
            self.node.system = v;
        }
        if let Ok(v) = std::env::var("HASHFALL_NODE__HOST") {
            self.node.host = v;
        }
        if let Ok(v) = std::env::var("HASHFALL_NODE__PORT") {
            if let Ok(p) = v.parse() {
                self.node.port = p;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_NODE__ROLE") {
            match v.as_str() {
                "master" => self.node.role = Role::Master,
                "worker" => self.node.role = Role::Worker,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_TRANSPORT__MAX_FRAME_BYTES") {
            if let Ok(n) = v.parse() {
                self.transport.max_frame_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_TRANSPORT__CONNECT_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.transport.connect_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_LARGE_MESSAGE__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.large_message.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_LARGE_MESSAGE__WINDOW") {
            if let Ok(n) = v.parse() {
                self.large_message.window = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_LARGE_MESSAGE__RESOLVE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.large_message.resolve_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_LARGE_MESSAGE__RESOLVE_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.large_message.resolve_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_LARGE_MESSAGE__RESOLVE_BACKOFF_MS") {
            if let Ok(n) = v.parse() {
                self.large_message.resolve_backoff_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_LARGE_MESSAGE__IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.large_message.idle_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_CLUSTER__MASTER") {
            if let Ok(path) = v.parse() {
                self.cluster.master = Some(path);
            }
        }
        if let Ok(v) = std::env::var("HASHFALL_CLUSTER__INPUT_PATH") {
            self.cluster.input_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HASHFALL_CLUSTER__LOCAL_WORKERS") {
            if let Ok(n) = v.parse() {
                self.cluster.local_workers = n;
            }
        }
    }
}

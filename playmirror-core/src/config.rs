//! Configuration
//!
//! Every field has a default, so an empty TOML document (or
//! `SyncConfig::default()`) gives the reference timing.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::predictor::DeviceCapabilities;

/// Default local player API port
pub const DEFAULT_PLAYER_PORT: u16 = 10767;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub monitor: MonitorConfig,
    pub broadcaster: BroadcasterConfig,
    pub predictor: PredictorConfig,
    pub player: PlayerConfig,
    pub device: DeviceCapabilities,
    pub network: NetworkConfig,
}

impl SyncConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

/// RTT probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub probe_interval_ms: u64,
    /// A probe without a pong after this long is abandoned
    pub probe_timeout_ms: u64,
    /// Number of RTT samples kept for mean/jitter
    pub sample_capacity: usize,
    /// RTT assumed by the predictor before the first sample arrives
    pub fallback_rtt_ms: f64,
}

impl MonitorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5000,
            probe_timeout_ms: 5000,
            sample_capacity: 10,
            fallback_rtt_ms: 20.0,
        }
    }
}

/// Host-side classification and emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Position jump (seconds) classified as a seek
    pub seek_threshold_secs: f64,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_ms: u64,
    /// How often the host player is read while hosting
    pub poll_interval_ms: u64,
}

impl BroadcasterConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            seek_threshold_secs: 2.0,
            heartbeat_enabled: false,
            heartbeat_interval_ms: 2000,
            poll_interval_ms: 500,
        }
    }
}

/// Follower admission windows and prediction bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub priority_throttle_ms: u64,
    pub ordinary_throttle_ms: u64,
    pub priority_lock_ms: u64,
    pub ordinary_lock_ms: u64,
    /// Furthest (seconds) a prediction may run ahead of the host position
    pub max_lead_secs: f64,
    /// Starting value of the learned processing delay
    pub initial_processing_delay_ms: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            priority_throttle_ms: 10,
            ordinary_throttle_ms: 30,
            priority_lock_ms: 15,
            ordinary_lock_ms: 35,
            max_lead_secs: 2.0,
            initial_processing_delay_ms: 50.0,
        }
    }
}

/// Local player HTTP API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub port: u16,
    pub api_token: Option<String>,
    /// Drift (seconds) tolerated before the follower actually seeks
    pub seek_tolerance_secs: f64,
    /// How long to wait for a newly requested song to load
    pub load_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PLAYER_PORT,
            api_token: None,
            seek_tolerance_secs: 0.25,
            load_timeout_ms: 5000,
        }
    }
}

/// libp2p room channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Whether to enable mDNS for local network discovery
    pub enable_mdns: bool,
    /// Peers dialed on startup (multiaddrs)
    pub bootstrap_peers: Vec<String>,
    pub listen_addresses: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enable_mdns: true,
            bootstrap_peers: Vec::new(),
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
        }
    }
}

//! FFI types exposed via uniffi

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::latency::NetworkStats;
use crate::network::NetworkError;
use crate::player::PlayerError;
use crate::predictor::{SyncQuality, SyncReport};
use crate::sync::{Role, Session};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Player is not reachable")]
    PlayerNotReachable,

    #[error("Player API error: {0}")]
    PlayerApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid config: {0}")]
    ConfigError(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Sync engine is not running")]
    EngineStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PlayerError> for CoreError {
    fn from(e: PlayerError) -> Self {
        match e {
            PlayerError::NotReachable => CoreError::PlayerNotReachable,
            PlayerError::Unauthorized => CoreError::PlayerApiError("Invalid API token".to_string()),
            PlayerError::Api(msg) => CoreError::PlayerApiError(msg),
            PlayerError::Http(e) => CoreError::NetworkError(e.to_string()),
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::AlreadyInRoom => CoreError::AlreadyInRoom,
            EngineError::NotInRoom => CoreError::NotInRoom,
            EngineError::Stopped => CoreError::EngineStopped,
        }
    }
}

impl From<NetworkError> for CoreError {
    fn from(e: NetworkError) -> Self {
        CoreError::NetworkError(e.to_string())
    }
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::ConfigError(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SessionRole {
    Host,
    Follower,
}

impl From<SessionRole> for Role {
    fn from(role: SessionRole) -> Self {
        match role {
            SessionRole::Host => Role::Host,
            SessionRole::Follower => Role::Follower,
        }
    }
}

impl From<Role> for SessionRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Host => SessionRole::Host,
            Role::Follower => SessionRole::Follower,
        }
    }
}

/// Room participation exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionInfo {
    pub room_id: String,
    pub role: SessionRole,
    /// False until the join is confirmed
    pub active: bool,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            room_id: s.room_id,
            role: s.role.into(),
            active: s.active,
        }
    }
}

/// Channel quality exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct NetworkStatsInfo {
    pub connected: bool,
    pub rtt_ms: Option<f64>,
    pub average_rtt_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub sample_count: u32,
    /// Milliseconds since the last successful probe
    pub age_ms: Option<u64>,
}

impl NetworkStatsInfo {
    pub fn new(stats: &NetworkStats, connected: bool) -> Self {
        Self {
            connected,
            rtt_ms: stats.rtt_ms,
            average_rtt_ms: stats.average_rtt_ms,
            jitter_ms: stats.jitter_ms,
            sample_count: stats.sample_count as u32,
            age_ms: stats.age().map(|d| d.as_millis() as u64),
        }
    }
}

/// One applied snapshot, for the sync status display
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncReportInfo {
    pub action: String,
    pub host_position_secs: f64,
    pub predicted_position_secs: f64,
    pub network_delay_ms: f64,
    pub processing_delay_ms: f64,
    pub realized_delay_ms: f64,
    pub adaptive_multiplier: f64,
    /// "good", "normal" or "bad"
    pub quality: String,
}

impl From<&SyncReport> for SyncReportInfo {
    fn from(r: &SyncReport) -> Self {
        Self {
            action: r.action.as_str().to_string(),
            host_position_secs: r.host_position,
            predicted_position_secs: r.predicted_position,
            network_delay_ms: r.network_delay * 1000.0,
            processing_delay_ms: r.processing_delay * 1000.0,
            realized_delay_ms: r.realized_delay.as_secs_f64() * 1000.0,
            adaptive_multiplier: r.adaptive_multiplier,
            quality: match r.quality {
                SyncQuality::Good => "good",
                SyncQuality::Normal => "normal",
                SyncQuality::Bad => "bad",
            }
            .to_string(),
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_joined(&self, session: SessionInfo);
    fn on_join_rejected(&self, room_id: String, reason: String);
    fn on_left(&self, room_id: String);
    /// The room was closed under us (host left)
    fn on_room_closed(&self, room_id: String, reason: String);
    fn on_connected(&self);
    fn on_disconnected(&self);
    /// Called for every snapshot applied (followers only)
    fn on_sync_applied(&self, report: SyncReportInfo);
    fn on_error(&self, message: String);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            CoreError::from(PlayerError::NotReachable),
            CoreError::PlayerNotReachable
        ));
        assert!(matches!(
            CoreError::from(EngineError::AlreadyInRoom),
            CoreError::AlreadyInRoom
        ));
    }

    #[test]
    fn test_report_units() {
        let report = SyncReport {
            action: crate::sync::Action::Play,
            host_position: 10.0,
            predicted_position: 10.313,
            network_delay: 0.1,
            processing_delay: 0.12,
            realized_delay: Duration::from_millis(80),
            adaptive_multiplier: 1.0,
            quality: SyncQuality::Normal,
        };
        let info = SyncReportInfo::from(&report);
        assert_eq!(info.action, "play");
        assert!((info.network_delay_ms - 100.0).abs() < 1e-9);
        assert!((info.realized_delay_ms - 80.0).abs() < 1e-9);
        assert_eq!(info.quality, "normal");
    }
}

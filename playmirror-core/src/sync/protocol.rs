//! Sync Protocol Messages

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{PlaybackState, Role};

/// Status text the relay answers a successful `join_room` with
pub const JOIN_STATUS_JOINED: &str = "joined";

/// Errors raised while decoding or validating a wire message
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// Information about a song for sync purposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Catalog song ID
    pub id: String,
    /// Song title
    #[serde(default)]
    pub title: String,
    /// Artist name
    #[serde(default)]
    pub artist: String,
    /// Duration in seconds, once the player knows it
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Repeat mode of the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}

/// What changed on the host, as classified by the broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Play,
    Pause,
    Resume,
    Seek,
    NewSong,
    Volume,
    Heartbeat,
    /// Internal sentinel for "nothing worth sending"
    Update,
}

impl Action {
    /// Priority actions get the shorter throttle and lock windows
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            Action::Play | Action::Pause | Action::Resume | Action::NewSong | Action::Seek
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Play => "play",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Seek => "seek",
            Action::NewSong => "newSong",
            Action::Volume => "volume",
            Action::Heartbeat => "heartbeat",
            Action::Update => "update",
        }
    }
}

/// One authoritative description of the host's playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub room_id: String,
    /// Host monotonic clock in milliseconds, read right before sending
    pub host_timestamp: f64,
    pub current_song: Option<Song>,
    /// 0.0 to 1.0
    pub current_volume: f64,
    /// Position in seconds
    pub currently_playing_on: f64,
    pub is_playing: bool,
    pub repeat_mode: RepeatMode,
    pub action: Action,
}

impl PlaybackSnapshot {
    /// Reject values a player could not sensibly apply
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.currently_playing_on.is_finite() {
            return Err(ProtocolError::InvalidField {
                field: "currentlyPlayingOn",
                reason: format!("not a finite position ({})", self.currently_playing_on),
            });
        }
        if !(0.0..=1.0).contains(&self.current_volume) {
            return Err(ProtocolError::InvalidField {
                field: "currentVolume",
                reason: format!("{} is outside 0..1", self.current_volume),
            });
        }
        if !self.host_timestamp.is_finite() {
            return Err(ProtocolError::InvalidField {
                field: "hostTimestamp",
                reason: "not finite".to_string(),
            });
        }
        Ok(())
    }

    /// The host's state as a local playback target (position unadjusted)
    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState {
            song: self.current_song.clone(),
            volume: self.current_volume,
            position: self.currently_playing_on,
            is_playing: self.is_playing,
            repeat_mode: self.repeat_mode,
        }
    }
}

/// Messages exchanged over the room channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SyncMessage {
    // === Room Lifecycle ===
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        role: Role,
    },

    /// Answer to `JoinRoom`: "joined" or a failure reason
    JoinStatus { message: String },

    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// The room is gone; members must leave
    RoomClosed { reason: String },

    // === Playback ===
    /// Host -> room
    PlaybackEvent(PlaybackSnapshot),

    /// Room -> follower
    SyncEvent(PlaybackSnapshot),

    // === Round-trip probing ===
    RttPing { timestamp: f64 },

    /// Echo of an `RttPing` timestamp
    RttPong { timestamp: f64 },
}

impl SyncMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let message: SyncMessage = serde_json::from_slice(bytes)?;
        match &message {
            SyncMessage::PlaybackEvent(snapshot) | SyncMessage::SyncEvent(snapshot) => {
                snapshot.validate()?
            }
            _ => {}
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Wire event name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::JoinRoom { .. } => "join_room",
            SyncMessage::JoinStatus { .. } => "join_status",
            SyncMessage::LeaveRoom { .. } => "leave_room",
            SyncMessage::RoomClosed { .. } => "room_closed",
            SyncMessage::PlaybackEvent(_) => "playback_event",
            SyncMessage::SyncEvent(_) => "sync_event",
            SyncMessage::RttPing { .. } => "rtt_ping",
            SyncMessage::RttPong { .. } => "rtt_pong",
        }
    }
}

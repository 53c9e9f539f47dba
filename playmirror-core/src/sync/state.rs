//! Session and Playback State

use serde::{Deserialize, Serialize};

use super::protocol::{RepeatMode, Song};

/// Which side of the room we are on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Follower,
}

/// Our participation in a room
///
/// Created inactive when a join is requested and activated by the
/// relay's `join_status`. Dropped on leave or forced closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub room_id: String,
    pub role: Role,
    pub active: bool,
}

impl Session {
    /// A session waiting for the relay to confirm the join
    pub fn pending(room_id: impl Into<String>, role: Role) -> Self {
        Self {
            room_id: room_id.into(),
            role,
            active: false,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Host and confirmed: the only state in which snapshots are emitted
    pub fn is_active_host(&self) -> bool {
        self.active && self.role == Role::Host
    }

    pub fn is_active_follower(&self) -> bool {
        self.active && self.role == Role::Follower
    }
}

/// Playback state of a local player
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub song: Option<Song>,
    /// 0.0 to 1.0
    pub volume: f64,
    /// Position in seconds
    pub position: f64,
    pub is_playing: bool,
    pub repeat_mode: RepeatMode,
}

impl PlaybackState {
    pub fn song_id(&self) -> Option<&str> {
        self.song.as_ref().map(|s| s.id.as_str())
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            song: None,
            volume: 1.0,
            position: 0.0,
            is_playing: false,
            repeat_mode: RepeatMode::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_roles() {
        let mut session = Session::pending("room", Role::Host);
        assert!(session.is_host());
        assert!(!session.is_active_host());

        session.active = true;
        assert!(session.is_active_host());
        assert!(!session.is_active_follower());
    }
}

//! Host Broadcaster
//!
//! Turns a stream of host player observations into classified actions.
//! The first observation only sets the baseline; after that every change is
//! reduced to a single action by fixed precedence.

use tracing::debug;

use crate::clock;
use crate::config::BroadcasterConfig;
use crate::sync::{Action, PlaybackSnapshot, PlaybackState};

/// Classify the change from `previous` to `current`. First match wins:
/// song, play state, position jump, volume. Anything else is `Update`.
pub fn classify(previous: &PlaybackState, current: &PlaybackState, seek_threshold: f64) -> Action {
    if previous.song_id() != current.song_id() {
        return Action::NewSong;
    }
    if previous.is_playing != current.is_playing {
        return if current.is_playing {
            Action::Play
        } else {
            Action::Pause
        };
    }
    if (current.position - previous.position).abs() > seek_threshold {
        return Action::Seek;
    }
    if previous.volume != current.volume {
        return Action::Volume;
    }
    Action::Update
}

pub struct HostBroadcaster {
    seek_threshold: f64,
    previous: Option<PlaybackState>,
}

impl HostBroadcaster {
    pub fn new(config: &BroadcasterConfig) -> Self {
        Self {
            seek_threshold: config.seek_threshold_secs,
            previous: None,
        }
    }

    /// Feed one observation. Returns the action to broadcast, if any.
    pub fn observe(&mut self, current: PlaybackState) -> Option<Action> {
        let Some(previous) = self.previous.replace(current) else {
            debug!("Captured host baseline");
            return None;
        };
        let current = self.previous.as_ref()?;

        match classify(&previous, current, self.seek_threshold) {
            Action::Update => None,
            action => {
                debug!(
                    action = action.as_str(),
                    position = current.position,
                    song_id = ?current.song_id(),
                    "Host state changed"
                );
                Some(action)
            }
        }
    }

    /// Forget the baseline (next observation is silent again)
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Most recent observation
    pub fn last_observed(&self) -> Option<&PlaybackState> {
        self.previous.as_ref()
    }

    /// Build the snapshot to send. The timestamp is read here, so call this
    /// immediately before transmitting.
    pub fn snapshot(room_id: &str, action: Action, state: &PlaybackState) -> PlaybackSnapshot {
        PlaybackSnapshot {
            room_id: room_id.to_string(),
            host_timestamp: clock::monotonic_ms(),
            current_song: state.song.clone(),
            current_volume: state.volume,
            currently_playing_on: state.position,
            is_playing: state.is_playing,
            repeat_mode: state.repeat_mode,
            action,
        }
    }
}

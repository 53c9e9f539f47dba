//! In-memory channel and player for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{ChannelError, RoomChannel};
use crate::player::{Player, PlayerError};
use crate::sync::{PlaybackSnapshot, PlaybackState, SyncMessage};

/// Records everything sent through it
#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<SyncMessage>>,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<SyncMessage> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<SyncMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn ping_timestamps(&self) -> Vec<f64> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SyncMessage::RttPing { timestamp } => Some(*timestamp),
                _ => None,
            })
            .collect()
    }

    pub fn playback_events(&self) -> Vec<PlaybackSnapshot> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SyncMessage::PlaybackEvent(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl RoomChannel for FakeChannel {
    fn send(&self, message: SyncMessage) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

/// A player whose state is whatever was last applied
#[derive(Default)]
pub struct FakePlayer {
    state: Mutex<PlaybackState>,
    applied: Mutex<Vec<PlaybackState>>,
    apply_delay: Duration,
    fail_next_apply: AtomicBool,
    unreadable: AtomicBool,
}

impl FakePlayer {
    pub fn with_apply_delay(apply_delay: Duration) -> Self {
        Self {
            apply_delay,
            ..Default::default()
        }
    }

    pub fn set_state(&self, state: PlaybackState) {
        *self.state.lock() = state;
    }

    pub fn applied(&self) -> Vec<PlaybackState> {
        self.applied.lock().clone()
    }

    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn snapshot(&self) -> Result<PlaybackState, PlayerError> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(PlayerError::NotReachable);
        }
        Ok(self.state.lock().clone())
    }

    async fn apply(&self, target: &PlaybackState) -> Result<(), PlayerError> {
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::Api("apply failed".to_string()));
        }
        *self.state.lock() = target.clone();
        self.applied.lock().push(target.clone());
        Ok(())
    }
}

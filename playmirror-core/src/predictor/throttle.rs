//! Snapshot admission control

use std::time::Duration;

use tokio::time::Instant;

use crate::config::PredictorConfig;
use crate::sync::Action;

/// Throttle and lock durations per action class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleWindows {
    pub priority_throttle: Duration,
    pub ordinary_throttle: Duration,
    pub priority_lock: Duration,
    pub ordinary_lock: Duration,
}

impl ThrottleWindows {
    fn throttle_for(&self, action: Action) -> Duration {
        if action.is_priority() {
            self.priority_throttle
        } else {
            self.ordinary_throttle
        }
    }

    fn lock_for(&self, action: Action) -> Duration {
        if action.is_priority() {
            self.priority_lock
        } else {
            self.ordinary_lock
        }
    }
}

impl From<&PredictorConfig> for ThrottleWindows {
    fn from(config: &PredictorConfig) -> Self {
        Self {
            priority_throttle: Duration::from_millis(config.priority_throttle_ms),
            ordinary_throttle: Duration::from_millis(config.ordinary_throttle_ms),
            priority_lock: Duration::from_millis(config.priority_lock_ms),
            ordinary_lock: Duration::from_millis(config.ordinary_lock_ms),
        }
    }
}

impl Default for ThrottleWindows {
    fn default() -> Self {
        Self::from(&PredictorConfig::default())
    }
}

/// Why a snapshot was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Inside the incoming snapshot's own throttle window
    Throttled { elapsed: Duration },
    /// Inside the lock left by the previously accepted snapshot
    Locked { elapsed: Duration, by: Action },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    last_sync_time: Option<Instant>,
    last_action: Option<Action>,
}

impl ThrottleState {
    pub fn last_sync_time(&self) -> Option<Instant> {
        self.last_sync_time
    }

    pub fn last_action(&self) -> Option<Action> {
        self.last_action
    }

    /// Decide whether `action` arriving at `now` may be applied. Never
    /// mutates; call `commit` once the snapshot was actually applied.
    pub fn check(&self, action: Action, now: Instant, windows: &ThrottleWindows) -> Admission {
        let (Some(last_time), Some(last_action)) = (self.last_sync_time, self.last_action) else {
            return Admission::Accepted;
        };

        let elapsed = now.saturating_duration_since(last_time);
        if elapsed < windows.throttle_for(action) {
            return Admission::Throttled { elapsed };
        }
        if elapsed < windows.lock_for(last_action) {
            return Admission::Locked {
                elapsed,
                by: last_action,
            };
        }
        Admission::Accepted
    }

    pub fn commit(&mut self, action: Action, at: Instant) {
        self.last_sync_time = Some(at);
        self.last_action = Some(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_snapshot_accepted() {
        let state = ThrottleState::default();
        let check = state.check(Action::Volume, Instant::now(), &ThrottleWindows::default());
        assert!(check.is_accepted());
    }

    #[test]
    fn test_same_class_inside_window_dropped() {
        let windows = ThrottleWindows::default();
        let mut state = ThrottleState::default();
        let t0 = Instant::now();

        assert!(state.check(Action::Volume, t0, &windows).is_accepted());
        state.commit(Action::Volume, t0);

        let t1 = t0 + Duration::from_millis(20);
        assert!(matches!(
            state.check(Action::Volume, t1, &windows),
            Admission::Throttled { .. }
        ));
        // Drop leaves the state alone
        assert_eq!(state.last_sync_time(), Some(t0));
        assert_eq!(state.last_action(), Some(Action::Volume));

        let t2 = t0 + Duration::from_millis(36);
        assert!(state.check(Action::Volume, t2, &windows).is_accepted());
    }

    #[test]
    fn test_lock_blocks_priority_after_ordinary() {
        let windows = ThrottleWindows::default();
        let mut state = ThrottleState::default();
        let t0 = Instant::now();
        state.commit(Action::Heartbeat, t0);

        // Past play's 10 ms throttle, still inside heartbeat's 35 ms lock
        let t1 = t0 + Duration::from_millis(20);
        assert_eq!(
            state.check(Action::Play, t1, &windows),
            Admission::Locked {
                elapsed: Duration::from_millis(20),
                by: Action::Heartbeat
            }
        );

        let t2 = t0 + Duration::from_millis(35);
        assert!(state.check(Action::Play, t2, &windows).is_accepted());
    }

    #[test]
    fn test_priority_after_priority() {
        let windows = ThrottleWindows::default();
        let mut state = ThrottleState::default();
        let t0 = Instant::now();
        state.commit(Action::Seek, t0);

        assert!(matches!(
            state.check(Action::Play, t0 + Duration::from_millis(5), &windows),
            Admission::Throttled { .. }
        ));
        assert!(matches!(
            state.check(Action::Play, t0 + Duration::from_millis(12), &windows),
            Admission::Locked { .. }
        ));
        assert!(state
            .check(Action::Play, t0 + Duration::from_millis(15), &windows)
            .is_accepted());
    }
}

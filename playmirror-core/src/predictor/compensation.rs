//! Position prediction
//!
//! Turns a host snapshot into the position the follower should jump to so
//! that, once the message and the local apply latency are paid for, both
//! sides are playing the same instant.

use crate::latency::NetworkStats;
use crate::sync::Action;

use super::device::DeviceProfile;

/// Extra lead for starting playback on a mobile audio stack (seconds)
const MOBILE_START_BONUS: f64 = 0.03;

/// Share of the jitter folded into the one-way estimate
const JITTER_WEIGHT: f64 = 0.5;

/// Per-action scaling of the processing delay and base compensation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionCompensation {
    pub processing_multiplier: f64,
    pub base_compensation: f64,
}

impl ActionCompensation {
    /// `None` for actions applied verbatim (no position adjustment)
    pub fn for_action(action: Action, is_playing: bool, device: &DeviceProfile) -> Option<Self> {
        let base = device.base_compensation;
        let (processing_multiplier, base_compensation) = match action {
            Action::Play | Action::Resume => {
                let bonus = if device.is_mobile() { MOBILE_START_BONUS } else { 0.0 };
                (1.4, base * 1.5 + bonus)
            }
            Action::NewSong => (1.2, base * 1.3),
            Action::Seek => (1.1, base),
            Action::Pause => (0.3, base * 0.5),
            Action::Volume => return None,
            Action::Heartbeat | Action::Update => (if is_playing { 0.8 } else { 0.2 }, base),
        };
        Some(Self {
            processing_multiplier,
            base_compensation,
        })
    }
}

/// One-way network delay estimate in seconds
pub fn network_delay_secs(stats: &NetworkStats, fallback_rtt_ms: f64, action: Action) -> f64 {
    let average_rtt = stats.average_rtt_ms.unwrap_or(fallback_rtt_ms);
    let mut delay_ms = average_rtt / 2.0;
    if let Some(jitter) = stats.jitter_ms {
        delay_ms += jitter / 2.0 * JITTER_WEIGHT;
    }
    if action == Action::Heartbeat {
        delay_ms /= 2.0;
    }
    delay_ms / 1000.0
}

/// Breakdown of one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub host_position: f64,
    pub network_delay: f64,
    pub processing_delay: f64,
    pub compensation: Option<ActionCompensation>,
    /// Final target position (seconds)
    pub position: f64,
}

impl Prediction {
    /// Seconds added on top of the host position
    pub fn offset(&self) -> f64 {
        self.position - self.host_position
    }
}

/// Compute the compensated target position.
///
/// The result is kept within `[0, host_position + max_lead]`; when that
/// upper bound is itself negative, 0 wins.
pub fn predict_position(
    host_position: f64,
    action: Action,
    is_playing: bool,
    network_delay: f64,
    processing_delay: f64,
    device: &DeviceProfile,
    max_lead: f64,
) -> Prediction {
    let compensation = ActionCompensation::for_action(action, is_playing, device);

    let position = match compensation {
        Some(c) => {
            let raw = host_position
                + network_delay
                + processing_delay * c.processing_multiplier * device.processing_multiplier
                + c.base_compensation;
            raw.min(host_position + max_lead).max(0.0)
        }
        // Volume: position passed through, still never negative
        None => host_position.max(0.0),
    };

    Prediction {
        host_position,
        network_delay,
        processing_delay,
        compensation,
        position,
    }
}

//! Follower Predictor
//!
//! Receives host snapshots and applies them to the local player with the
//! position pushed forward by the estimated network and processing delay.
//! Each applied snapshot feeds back the delay that was actually observed.

mod compensation;
mod device;
mod performance;
mod throttle;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PredictorConfig;
use crate::latency::NetworkStats;
use crate::player::{Player, PlayerError};
use crate::sync::{Action, PlaybackSnapshot, PlaybackState};

pub use compensation::{network_delay_secs, predict_position, ActionCompensation, Prediction};
pub use device::{BrowserFamily, DeviceCapabilities, DeviceClass, DeviceProfile};
pub use performance::{Measurement, PerformanceProfile, SyncQuality};
pub use throttle::{Admission, ThrottleState, ThrottleWindows};

/// Summary of one applied snapshot, for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub action: Action,
    pub host_position: f64,
    pub predicted_position: f64,
    /// Seconds
    pub network_delay: f64,
    /// Seconds, before action and device scaling
    pub processing_delay: f64,
    /// Measured time from scheduling to the player finishing the apply
    pub realized_delay: Duration,
    pub adaptive_multiplier: f64,
    pub quality: SyncQuality,
}

/// What happened to a received snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Applied(SyncReport),
    Dropped(Admission),
}

pub struct FollowerPredictor {
    config: PredictorConfig,
    windows: ThrottleWindows,
    /// RTT assumed while no sample exists
    fallback_rtt_ms: f64,
    capabilities: DeviceCapabilities,
    device: Option<DeviceProfile>,
    performance: PerformanceProfile,
    throttle: ThrottleState,
}

impl FollowerPredictor {
    pub fn new(config: PredictorConfig, capabilities: DeviceCapabilities, fallback_rtt_ms: f64) -> Self {
        Self {
            windows: ThrottleWindows::from(&config),
            performance: PerformanceProfile::new(config.initial_processing_delay_ms),
            config,
            fallback_rtt_ms,
            capabilities,
            device: None,
            throttle: ThrottleState::default(),
        }
    }

    /// Computed on first use, then fixed for the lifetime of the predictor
    pub fn device_profile(&mut self) -> &DeviceProfile {
        let capabilities = &self.capabilities;
        self.device
            .get_or_insert_with(|| DeviceProfile::from_capabilities(capabilities))
    }

    pub fn performance(&self) -> &PerformanceProfile {
        &self.performance
    }

    pub fn throttle(&self) -> &ThrottleState {
        &self.throttle
    }

    pub fn admit(&self, action: Action, now: Instant) -> Admission {
        self.throttle.check(action, now, &self.windows)
    }

    /// Target state for `snapshot` under the current estimates
    pub fn predict(&mut self, snapshot: &PlaybackSnapshot, stats: &NetworkStats) -> Prediction {
        let network_delay = network_delay_secs(stats, self.fallback_rtt_ms, snapshot.action);
        let processing_delay = self.performance.processing_delay_secs();
        let max_lead = self.config.max_lead_secs;
        let device = self.device_profile().clone();

        predict_position(
            snapshot.currently_playing_on,
            snapshot.action,
            snapshot.is_playing,
            network_delay,
            processing_delay,
            &device,
            max_lead,
        )
    }

    /// Admit, predict, apply and learn from one host snapshot.
    ///
    /// Admission and the throttle commit use `received_at`, the instant the
    /// snapshot arrived, so time spent queued behind an earlier apply does
    /// not open the throttle window. A player error leaves every piece of
    /// predictor state untouched.
    pub async fn handle_snapshot(
        &mut self,
        snapshot: &PlaybackSnapshot,
        received_at: Instant,
        stats: &NetworkStats,
        player: &dyn Player,
    ) -> Result<SyncOutcome, PlayerError> {
        let admission = self.admit(snapshot.action, received_at);
        if !admission.is_accepted() {
            debug!(action = snapshot.action.as_str(), ?admission, "Snapshot dropped");
            return Ok(SyncOutcome::Dropped(admission));
        }

        let prediction = self.predict(snapshot, stats);
        let target = PlaybackState {
            position: prediction.position,
            ..snapshot.playback_state()
        };

        let scheduled_at = Instant::now();
        player.next_render().await;
        player.apply(&target).await?;
        let realized_delay = scheduled_at.elapsed();

        let is_start = matches!(snapshot.action, Action::Play | Action::Resume);
        let quality = self
            .performance
            .record(realized_delay.as_secs_f64() * 1000.0, is_start);
        self.throttle.commit(snapshot.action, received_at);

        let report = SyncReport {
            action: snapshot.action,
            host_position: prediction.host_position,
            predicted_position: prediction.position,
            network_delay: prediction.network_delay,
            processing_delay: prediction.processing_delay,
            realized_delay,
            adaptive_multiplier: self.performance.adaptive_multiplier(),
            quality,
        };

        debug!(
            action = report.action.as_str(),
            host_position = report.host_position,
            predicted_position = report.predicted_position,
            network_delay = report.network_delay,
            processing_delay = report.processing_delay,
            realized_ms = realized_delay.as_secs_f64() * 1000.0,
            multiplier = report.adaptive_multiplier,
            "Snapshot applied"
        );

        Ok(SyncOutcome::Applied(report))
    }

    /// Network changed: relearn processing delay behaviour from scratch
    pub fn on_reconnect(&mut self) {
        info!("Resetting performance profile after reconnect");
        self.performance.reset();
    }
}

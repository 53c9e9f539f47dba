//! Latency tracking for the room channel
//!
//! Measures round-trip time (RTT) to the relay with ping/pong probes and
//! derives the mean and jitter the follower uses for delay compensation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::clock;

/// Number of RTT samples to keep for averaging
pub const RTT_SAMPLE_COUNT: usize = 10;

/// A probe sent and not yet answered
struct PendingProbe {
    timestamp: f64,
    sent_at: Instant,
}

/// Network quality derived from the retained RTT samples
///
/// Values are `None` until the first probe completes. After a disconnect
/// they are left as they were; check `last_updated` when freshness matters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkStats {
    /// Latest sample (ms)
    pub rtt_ms: Option<f64>,
    /// Mean of the retained samples (ms)
    pub average_rtt_ms: Option<f64>,
    /// Population standard deviation of the retained samples (ms)
    pub jitter_ms: Option<f64>,
    pub sample_count: usize,
    pub last_updated: Option<Instant>,
}

impl NetworkStats {
    /// Time since the last successful probe
    pub fn age(&self) -> Option<Duration> {
        self.last_updated.map(|at| at.elapsed())
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age().is_some_and(|age| age <= max_age)
    }
}

/// Bounded FIFO of RTT samples in milliseconds
#[derive(Debug, Clone)]
pub struct RttWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RttWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, rtt_ms: f64) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population standard deviation
    pub fn jitter(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(variance.sqrt())
    }
}

/// Tracks probes in flight and the resulting network statistics
pub struct LatencyTracker {
    window: RttWindow,
    stats: NetworkStats,
    pending: Vec<PendingProbe>,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: RttWindow::new(capacity),
            stats: NetworkStats::default(),
            pending: Vec::new(),
        }
    }

    /// Register a new probe. Returns the timestamp to carry in the ping.
    pub fn create_probe(&mut self) -> f64 {
        let timestamp = clock::monotonic_ms();
        self.pending.push(PendingProbe {
            timestamp,
            sent_at: Instant::now(),
        });
        timestamp
    }

    /// Handle a pong. Returns the measured RTT if it answers one of our
    /// pending probes.
    pub fn handle_pong(&mut self, timestamp: f64) -> Option<f64> {
        let index = self.pending.iter().position(|p| p.timestamp == timestamp)?;
        let probe = self.pending.swap_remove(index);
        let rtt_ms = probe.sent_at.elapsed().as_secs_f64() * 1000.0;

        self.record_sample(rtt_ms);

        debug!(
            rtt_ms,
            average_rtt_ms = ?self.stats.average_rtt_ms,
            jitter_ms = ?self.stats.jitter_ms,
            "RTT probe answered"
        );

        Some(rtt_ms)
    }

    /// Drop a probe that timed out. Returns false if it was already answered.
    pub fn abandon(&mut self, timestamp: f64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.timestamp != timestamp);
        self.pending.len() != before
    }

    pub fn record_sample(&mut self, rtt_ms: f64) {
        self.window.push(rtt_ms);
        self.stats = NetworkStats {
            rtt_ms: Some(rtt_ms),
            average_rtt_ms: self.window.mean(),
            jitter_ms: self.window.jitter(),
            sample_count: self.window.len(),
            last_updated: Some(Instant::now()),
        };
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }

    pub fn window(&self) -> &RttWindow {
        &self.window
    }

    pub fn pending_probes(&self) -> usize {
        self.pending.len()
    }

    /// Forget probes in flight (their pongs will be ignored)
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(RTT_SAMPLE_COUNT)
    }
}

/// Thread-safe wrapper for LatencyTracker
pub type SharedLatencyTracker = Arc<RwLock<LatencyTracker>>;

/// Create a new shared latency tracker
pub fn new_shared_tracker(capacity: usize) -> SharedLatencyTracker {
    Arc::new(RwLock::new(LatencyTracker::new(capacity)))
}

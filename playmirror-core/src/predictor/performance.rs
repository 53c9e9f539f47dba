//! Learned processing delay
//!
//! Tracks how long applying a snapshot to the local player really takes and
//! adapts a multiplier on top of it.

use std::collections::VecDeque;

/// Number of weighted measurements kept
const MEASUREMENT_CAPACITY: usize = 10;

/// Weight of a play/resume measurement (those dominate perceived sync)
const START_WEIGHT: f64 = 1.5;

const MIN_MULTIPLIER: f64 = 0.7;
const MAX_MULTIPLIER: f64 = 1.5;

/// Multiplier decay per good sync once the streak is long enough
const GOOD_STEP: f64 = 0.05;
const BAD_STEP: f64 = 0.1;

/// Good syncs needed before the multiplier starts to decay
const GOOD_STREAK: u32 = 3;

/// realized < 80% of the average counts as good
const GOOD_RATIO: f64 = 0.8;
/// realized > 130% of the average counts as bad
const BAD_RATIO: f64 = 1.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub delay_ms: f64,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceProfile {
    avg_processing_delay_ms: f64,
    measurements: VecDeque<Measurement>,
    adaptive_multiplier: f64,
    consecutive_good_syncs: u32,
}

/// How a measurement compared with the running average
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQuality {
    Good,
    Normal,
    Bad,
}

impl PerformanceProfile {
    pub fn new(initial_delay_ms: f64) -> Self {
        Self {
            avg_processing_delay_ms: initial_delay_ms,
            measurements: VecDeque::with_capacity(MEASUREMENT_CAPACITY),
            adaptive_multiplier: 1.0,
            consecutive_good_syncs: 0,
        }
    }

    pub fn avg_processing_delay_ms(&self) -> f64 {
        self.avg_processing_delay_ms
    }

    pub fn adaptive_multiplier(&self) -> f64 {
        self.adaptive_multiplier
    }

    pub fn consecutive_good_syncs(&self) -> u32 {
        self.consecutive_good_syncs
    }

    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter()
    }

    /// Processing delay estimate in seconds
    pub fn processing_delay_secs(&self) -> f64 {
        self.avg_processing_delay_ms * self.adaptive_multiplier / 1000.0
    }

    /// Fold in one realized apply delay.
    ///
    /// The good/bad verdict is taken against the average as it stood before
    /// this measurement.
    pub fn record(&mut self, delay_ms: f64, is_start: bool) -> SyncQuality {
        let previous_avg = self.avg_processing_delay_ms;

        let weight = if is_start { START_WEIGHT } else { 1.0 };
        while self.measurements.len() >= MEASUREMENT_CAPACITY {
            self.measurements.pop_front();
        }
        self.measurements.push_back(Measurement { delay_ms, weight });

        let (sum, total_weight) = self
            .measurements
            .iter()
            .fold((0.0, 0.0), |(s, w), m| (s + m.delay_ms * m.weight, w + m.weight));
        self.avg_processing_delay_ms = sum / total_weight;

        if delay_ms < previous_avg * GOOD_RATIO {
            self.consecutive_good_syncs += 1;
            if self.consecutive_good_syncs > GOOD_STREAK {
                self.adaptive_multiplier = (self.adaptive_multiplier - GOOD_STEP).max(MIN_MULTIPLIER);
            }
            SyncQuality::Good
        } else if delay_ms > previous_avg * BAD_RATIO {
            self.consecutive_good_syncs = 0;
            self.adaptive_multiplier = (self.adaptive_multiplier + BAD_STEP).min(MAX_MULTIPLIER);
            SyncQuality::Bad
        } else {
            SyncQuality::Normal
        }
    }

    /// Network changed: forget what we learned except the running average
    pub fn reset(&mut self) {
        self.measurements.clear();
        self.adaptive_multiplier = 1.0;
        self.consecutive_good_syncs = 0;
    }
}

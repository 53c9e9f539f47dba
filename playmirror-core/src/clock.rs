//! Monotonic millisecond clock
//!
//! Snapshot and probe timestamps are high-resolution milliseconds since a
//! per-process epoch.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the process-wide epoch, with sub-millisecond precision
pub fn monotonic_ms() -> f64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64() * 1000.0
}

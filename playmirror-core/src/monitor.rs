//! Channel Monitor
//!
//! Probes the relay every few seconds while the channel is connected and
//! keeps the resulting `NetworkStats` up to date for the predictor and the
//! status UI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::RoomChannel;
use crate::config::MonitorConfig;
use crate::latency::{self, NetworkStats, SharedLatencyTracker};
use crate::sync::SyncMessage;

struct MonitorInner {
    config: MonitorConfig,
    tracker: SharedLatencyTracker,
    channel: Arc<dyn RoomChannel>,
    connected: AtomicBool,
    /// Handle for cancelling the periodic probe loop
    probe_loop_cancel: Mutex<Option<oneshot::Sender<()>>>,
}

/// Connection readiness and RTT statistics for one channel
#[derive(Clone)]
pub struct ChannelMonitor {
    inner: Arc<MonitorInner>,
}

impl ChannelMonitor {
    pub fn new(config: MonitorConfig, channel: Arc<dyn RoomChannel>) -> Self {
        let tracker = latency::new_shared_tracker(config.sample_capacity);
        Self {
            inner: Arc::new(MonitorInner {
                config,
                tracker,
                channel,
                connected: AtomicBool::new(false),
                probe_loop_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.tracker.read().stats()
    }

    pub fn tracker(&self) -> SharedLatencyTracker {
        Arc::clone(&self.inner.tracker)
    }

    /// Start probing: one probe now, then one per interval
    pub fn on_connected(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("Channel connected, starting RTT probes");
        self.start_probe_loop();
    }

    /// Stop probing. Existing stats are kept (stale, not cleared).
    pub fn on_disconnected(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.stop_probe_loop();
        self.inner.tracker.write().clear_pending();
        warn!("Channel disconnected, RTT probes stopped");
    }

    /// Record a pong. Returns the RTT if it answered one of our probes.
    pub fn handle_pong(&self, timestamp: f64) -> Option<f64> {
        self.inner.tracker.write().handle_pong(timestamp)
    }

    /// Send a probe outside the regular cadence
    pub fn force_probe(&self) -> bool {
        self.probe()
    }

    pub fn shutdown(&self) {
        self.stop_probe_loop();
    }

    fn probe(&self) -> bool {
        if !self.is_connected() {
            debug!("Not connected, skipping RTT probe");
            return false;
        }

        let timestamp = self.inner.tracker.write().create_probe();
        if let Err(e) = self.inner.channel.send(SyncMessage::RttPing { timestamp }) {
            warn!("Failed to send RTT probe: {}", e);
            self.inner.tracker.write().abandon(timestamp);
            return false;
        }

        // Abandon in place if nobody answers in time
        let tracker = Arc::clone(&self.inner.tracker);
        let timeout = self.inner.config.probe_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if tracker.write().abandon(timestamp) {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "RTT probe got no pong, abandoning"
                );
            }
        });

        true
    }

    fn start_probe_loop(&self) {
        // Stop any existing loop first
        self.stop_probe_loop();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.inner.probe_loop_cancel.lock() = Some(cancel_tx);

        let monitor = self.clone();
        let period = self.inner.config.probe_interval().max(Duration::from_millis(1));

        tokio::spawn(async move {
            debug!("RTT probe loop started");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    // First tick completes immediately
                    _ = ticker.tick() => {
                        monitor.probe();
                    }
                }
            }

            debug!("RTT probe loop ended");
        });
    }

    fn stop_probe_loop(&self) {
        if let Some(tx) = self.inner.probe_loop_cancel.lock().take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChannel;

    fn monitor() -> (ChannelMonitor, Arc<FakeChannel>) {
        let channel = Arc::new(FakeChannel::default());
        let monitor = ChannelMonitor::new(MonitorConfig::default(), channel.clone());
        (monitor, channel)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_then_periodic_probes() {
        let (monitor, channel) = monitor();

        monitor.on_connected();
        settle().await;
        assert_eq!(channel.ping_timestamps().len(), 1);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(channel.ping_timestamps().len(), 2);

        monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_updates_stats() {
        let (monitor, channel) = monitor();
        monitor.on_connected();
        settle().await;

        let ts = channel.ping_timestamps()[0];
        tokio::time::sleep(Duration::from_millis(79)).await;
        let rtt = monitor.handle_pong(ts).unwrap();

        assert!((79.0..=81.0).contains(&rtt), "rtt was {}", rtt);
        assert_eq!(monitor.stats().average_rtt_ms, Some(rtt));

        monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out() {
        let (monitor, channel) = monitor();
        monitor.on_connected();
        settle().await;
        let ts = channel.ping_timestamps()[0];

        tokio::time::sleep(Duration::from_millis(5100)).await;

        assert_eq!(monitor.handle_pong(ts), None);
        assert_eq!(monitor.stats().sample_count, 0);

        monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_probing_and_keeps_stats() {
        let (monitor, channel) = monitor();
        monitor.on_connected();
        settle().await;
        let ts = channel.ping_timestamps()[0];
        monitor.handle_pong(ts);
        let before = monitor.stats();

        monitor.on_disconnected();
        assert!(!monitor.is_connected());
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(channel.ping_timestamps().len(), 1);
        assert_eq!(monitor.stats(), before);
        assert!(!monitor.force_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_probes_immediately() {
        let (monitor, channel) = monitor();
        monitor.on_connected();
        settle().await;
        monitor.on_disconnected();

        monitor.on_connected();
        settle().await;
        assert_eq!(channel.ping_timestamps().len(), 2);

        assert!(monitor.force_probe());
        assert_eq!(channel.ping_timestamps().len(), 3);

        monitor.shutdown();
    }
}

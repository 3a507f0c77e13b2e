//! Transfer statistics: cumulative totals and windowed rates.
//!
//! Totals are monotonic and wrap on overflow. Rates use reset-and-accumulate
//! sampling: bytes seen during the current window divided by the elapsed
//! window time, published when the window rolls.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct StatsTracker {
    total_tx: u64,
    total_rx: u64,
    window: Duration,
    window_started: Instant,
    window_tx: u64,
    window_rx: u64,
    tx_rate: u64,
    rx_rate: u64,
    overflow_dropped: u64,
    blocked_inbound_dropped: u64,
}

/// Point-in-time view of the tracker, shaped for the `/stats` endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub tx: u64,
    pub rx: u64,
    #[serde(rename = "txRateBps")]
    pub tx_rate_bps: u64,
    #[serde(rename = "rxRateBps")]
    pub rx_rate_bps: u64,
    #[serde(rename = "overflowDropped")]
    pub overflow_dropped: u64,
    #[serde(rename = "forcedResumes")]
    pub forced_resumes: u64,
    #[serde(rename = "blockedInboundDropped")]
    pub blocked_inbound_dropped: u64,
}

impl StatsTracker {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            total_tx: 0,
            total_rx: 0,
            window,
            window_started: now,
            window_tx: 0,
            window_rx: 0,
            tx_rate: 0,
            rx_rate: 0,
            overflow_dropped: 0,
            blocked_inbound_dropped: 0,
        }
    }

    /// Record bytes written to the UART.
    pub fn record_tx(&mut self, n: usize) {
        self.total_tx = self.total_tx.wrapping_add(n as u64);
        self.window_tx = self.window_tx.saturating_add(n as u64);
    }

    /// Record bytes read from the UART.
    pub fn record_rx(&mut self, n: usize) {
        self.total_rx = self.total_rx.wrapping_add(n as u64);
        self.window_rx = self.window_rx.saturating_add(n as u64);
    }

    pub fn record_overflow_dropped(&mut self, n: usize) {
        self.overflow_dropped = self.overflow_dropped.wrapping_add(n as u64);
    }

    pub fn record_blocked_inbound_dropped(&mut self, n: usize) {
        self.blocked_inbound_dropped = self.blocked_inbound_dropped.wrapping_add(n as u64);
    }

    /// Close the sampling window if it has elapsed and publish new rates.
    pub fn roll_window(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.window_started);
        if elapsed < self.window {
            return;
        }
        let elapsed_ms = elapsed.as_millis().max(1) as u64;
        self.tx_rate = self.window_tx.saturating_mul(1000) / elapsed_ms;
        self.rx_rate = self.window_rx.saturating_mul(1000) / elapsed_ms;
        self.window_tx = 0;
        self.window_rx = 0;
        self.window_started = now;
    }

    pub fn total_tx(&self) -> u64 {
        self.total_tx
    }

    pub fn total_rx(&self) -> u64 {
        self.total_rx
    }

    /// Bytes per second toward the UART, from the last closed window.
    pub fn tx_rate(&self) -> u64 {
        self.tx_rate
    }

    /// Bytes per second from the UART, from the last closed window.
    pub fn rx_rate(&self) -> u64 {
        self.rx_rate
    }

    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped
    }

    pub fn blocked_inbound_dropped(&self) -> u64 {
        self.blocked_inbound_dropped
    }

    pub fn snapshot(&self, forced_resumes: u64) -> StatsSnapshot {
        StatsSnapshot {
            tx: self.total_tx,
            rx: self.total_rx,
            tx_rate_bps: self.tx_rate,
            rx_rate_bps: self.rx_rate,
            overflow_dropped: self.overflow_dropped,
            forced_resumes,
            blocked_inbound_dropped: self.blocked_inbound_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_totals_accumulate() {
        let t0 = Instant::now();
        let mut stats = StatsTracker::new(ms(1000), t0);
        stats.record_rx(100);
        stats.record_rx(50);
        stats.record_tx(7);
        assert_eq!(stats.total_rx(), 150);
        assert_eq!(stats.total_tx(), 7);
    }

    #[test]
    fn test_rate_converges_to_bytes_over_elapsed() {
        let t0 = Instant::now();
        let mut stats = StatsTracker::new(ms(1000), t0);

        // 2000 bytes over exactly 2 seconds => 1000 B/s.
        stats.record_rx(2000);
        stats.roll_window(t0 + ms(2000));
        assert_eq!(stats.rx_rate(), 1000);
        assert_eq!(stats.tx_rate(), 0);

        // Silence for the next full window drives the rate to zero.
        stats.roll_window(t0 + ms(3000));
        assert_eq!(stats.rx_rate(), 0);
    }

    #[test]
    fn test_window_does_not_roll_early() {
        let t0 = Instant::now();
        let mut stats = StatsTracker::new(ms(1000), t0);
        stats.record_tx(500);
        stats.roll_window(t0 + ms(400));
        // Window still open: previous (zero) rate stands.
        assert_eq!(stats.tx_rate(), 0);
        stats.roll_window(t0 + ms(1000));
        assert_eq!(stats.tx_rate(), 500);
    }

    #[test]
    fn test_totals_wrap_instead_of_panicking() {
        let t0 = Instant::now();
        let mut stats = StatsTracker::new(ms(1000), t0);
        stats.total_rx = u64::MAX;
        stats.record_rx(2);
        assert_eq!(stats.total_rx(), 1);
    }

    #[test]
    fn test_snapshot_shape() {
        let t0 = Instant::now();
        let mut stats = StatsTracker::new(ms(1000), t0);
        stats.record_rx(10);
        stats.record_overflow_dropped(3);

        let snapshot = stats.snapshot(2);
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["rx"], 10);
        assert_eq!(json["overflowDropped"], 3);
        assert_eq!(json["forcedResumes"], 2);
        assert!(json.get("rxRateBps").is_some());
    }
}

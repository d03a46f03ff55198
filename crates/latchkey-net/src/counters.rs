//! Session telemetry counters.
//!
//! Shared between the session task and whoever answers
//! `metrics_query`, so everything is atomic. Counters are cumulative
//! over the process lifetime, never reset on reconnect.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    /// Successful TCP connects (the first connect counts too).
    pub tcp_connects: AtomicU64,
    /// Peer certificates rejected by the pin set.
    pub fingerprint_errors: AtomicU64,
    /// Errors detected in the read/decode path.
    pub sync_errors: AtomicU64,
    /// Errors reported out-of-band by the transport.
    pub async_errors: AtomicU64,
    /// Times an outbound frame had to wait for channel capacity.
    pub tx_delay_count: AtomicU64,
    /// Largest inbound frame payload seen.
    pub rx_high_watermark: AtomicUsize,
    /// Deepest outbound queue seen.
    pub tx_high_watermark: AtomicUsize,
}

/// Point-in-time copy for a metrics reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub tcp_connects: u64,
    pub fingerprint_errors: u64,
    pub sync_errors: u64,
    pub async_errors: u64,
    pub tx_delay_count: u64,
    pub rx_high_watermark: usize,
    pub tx_high_watermark: usize,
}

impl Counters {
    pub fn incr(field: &AtomicU64) {
        field.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watermark(field: &AtomicUsize, observed: usize) {
        field.fetch_max(observed, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            tcp_connects: self.tcp_connects.load(Ordering::Relaxed),
            fingerprint_errors: self.fingerprint_errors.load(Ordering::Relaxed),
            sync_errors: self.sync_errors.load(Ordering::Relaxed),
            async_errors: self.async_errors.load(Ordering::Relaxed),
            tx_delay_count: self.tx_delay_count.load(Ordering::Relaxed),
            rx_high_watermark: self.rx_high_watermark.load(Ordering::Relaxed),
            tx_high_watermark: self.tx_high_watermark.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_keeps_max() {
        let c = Counters::default();
        Counters::watermark(&c.rx_high_watermark, 100);
        Counters::watermark(&c.rx_high_watermark, 50);
        Counters::watermark(&c.rx_high_watermark, 120);
        assert_eq!(c.snapshot().rx_high_watermark, 120);
    }

    #[test]
    fn test_snapshot_reflects_increments() {
        let c = Counters::default();
        Counters::incr(&c.tcp_connects);
        Counters::incr(&c.tcp_connects);
        Counters::incr(&c.sync_errors);
        let snap = c.snapshot();
        assert_eq!(snap.tcp_connects, 2);
        assert_eq!(snap.sync_errors, 1);
        assert_eq!(snap.async_errors, 0);
    }
}

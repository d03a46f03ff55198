//! Reader health tracking: probe scheduling, reset backoff, and the
//! rate-limit fuse that bounds reader usage during tag storms.

use latchkey_core::constants::{
    READER_CHECK_INTERVAL_MAX, READER_CHECK_INTERVAL_MIN, READER_LIMIT_PER_1M,
    READER_LIMIT_PER_5S,
};
use std::time::{Duration, Instant};
use tracing::warn;

/// Configured ceilings for the sliding read counters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    /// Maximum successful new-token reads per 5-second window.
    pub per_5s: u32,
    /// Maximum successful new-token reads per 1-minute window.
    pub per_1m: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            per_5s: READER_LIMIT_PER_5S,
            per_1m: READER_LIMIT_PER_1M,
        }
    }
}

/// One counting window: resets when its span elapses.
#[derive(Debug, Clone)]
struct Window {
    span: Duration,
    count: u32,
    started_at: Option<Instant>,
}

impl Window {
    fn new(span: Duration) -> Self {
        Window {
            span,
            count: 0,
            started_at: None,
        }
    }

    /// Count one read; returns the window total after the increment.
    fn record(&mut self, now: Instant) -> u32 {
        match self.started_at {
            Some(start) if now.duration_since(start) < self.span => {}
            _ => {
                self.started_at = Some(now);
                self.count = 0;
            }
        }
        self.count += 1;
        self.count
    }

    fn reset(&mut self) {
        self.count = 0;
        self.started_at = None;
    }
}

/// Health state for the reader chip.
///
/// Invariant: a counting window never exceeds its configured limit while
/// `ready` remains true; tripping a limit forces `ready = false` so the
/// engine takes the reset path.
#[derive(Debug)]
pub struct ReaderHealth {
    ready: bool,
    /// Current probe/reset interval. Doubles on failed reset probes,
    /// clamped to the configured maximum; successful probes reset it.
    check_interval: Duration,
    last_check: Option<Instant>,
    last_reset: Option<Instant>,
    pub reset_count: u32,
    pub rate_limit_trips: u32,
    limits: RateLimits,
    per_5s: Window,
    per_1m: Window,
}

impl ReaderHealth {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        ReaderHealth {
            ready: false,
            check_interval: READER_CHECK_INTERVAL_MIN,
            last_check: None,
            last_reset: None,
            reset_count: 0,
            rate_limit_trips: 0,
            limits,
            per_5s: Window::new(Duration::from_secs(5)),
            per_1m: Window::new(Duration::from_secs(60)),
        }
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Time for the periodic firmware-version re-probe?
    #[must_use]
    pub fn probe_due(&self, now: Instant) -> bool {
        self.ready
            && match self.last_check {
                Some(at) => now.duration_since(at) >= self.check_interval,
                None => true,
            }
    }

    /// Time for a reset pulse? At most one per backoff interval.
    #[must_use]
    pub fn reset_due(&self, now: Instant) -> bool {
        !self.ready
            && match self.last_reset {
                Some(at) => now.duration_since(at) >= self.check_interval,
                None => true,
            }
    }

    pub fn note_reset_pulse(&mut self, now: Instant) {
        self.last_reset = Some(now);
        self.reset_count += 1;
    }

    /// A probe answered: the reader is alive.
    pub fn note_probe_ok(&mut self, now: Instant) {
        self.ready = true;
        self.last_check = Some(now);
        self.check_interval = READER_CHECK_INTERVAL_MIN;
    }

    /// A probe went unanswered. While not ready this also widens the
    /// reset backoff.
    pub fn note_probe_failed(&mut self) {
        if !self.ready {
            self.check_interval = (self.check_interval * 2).min(READER_CHECK_INTERVAL_MAX);
        }
        self.ready = false;
    }

    /// A transport-level fault: drop straight back to the reset path.
    pub fn note_fault(&mut self) {
        self.ready = false;
    }

    /// Count one successful new-token read against both windows.
    ///
    /// Returns `false` and forces `ready = false` when either window
    /// exceeds its limit. This is the reader's self-protection fuse:
    /// runaway read loops and tag storms hit the reset/backoff path
    /// instead of hammering the chip.
    pub fn record_read(&mut self, now: Instant) -> bool {
        let c5 = self.per_5s.record(now);
        let c60 = self.per_1m.record(now);
        if c5 > self.limits.per_5s || c60 > self.limits.per_1m {
            warn!(
                reads_5s = c5,
                reads_1m = c60,
                reason = "rate_limit",
                "reader read limit exceeded, forcing reset"
            );
            self.rate_limit_trips += 1;
            self.ready = false;
            self.per_5s.reset();
            self.per_1m.reset();
            return false;
        }
        true
    }
}

impl Default for ReaderHealth {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_health(limits: RateLimits) -> (ReaderHealth, Instant) {
        let mut h = ReaderHealth::new(limits);
        let now = Instant::now();
        h.note_probe_ok(now);
        (h, now)
    }

    #[test]
    fn test_limit_trips_on_next_read_over() {
        let (mut h, now) = ready_health(RateLimits {
            per_5s: 30,
            per_1m: 1000,
        });
        for _ in 0..30 {
            assert!(h.record_read(now));
        }
        assert!(h.ready());
        // the 31st read within the window trips the fuse
        assert!(!h.record_read(now));
        assert!(!h.ready());
        assert_eq!(h.rate_limit_trips, 1);
    }

    #[test]
    fn test_window_resets_after_span() {
        let (mut h, now) = ready_health(RateLimits {
            per_5s: 2,
            per_1m: 1000,
        });
        assert!(h.record_read(now));
        assert!(h.record_read(now));
        // 6 seconds later the 5s window has rolled over
        let later = now + Duration::from_secs(6);
        assert!(h.record_read(later));
        assert!(h.ready());
    }

    #[test]
    fn test_minute_window_trips_independently() {
        let (mut h, now) = ready_health(RateLimits {
            per_5s: 1000,
            per_1m: 10,
        });
        for i in 0..10 {
            assert!(h.record_read(now + Duration::from_secs(i)));
        }
        assert!(!h.record_read(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_backoff_doubles_and_clamps() {
        let mut h = ReaderHealth::default();
        let mut now = Instant::now();
        assert!(h.reset_due(now));
        for _ in 0..10 {
            h.note_reset_pulse(now);
            h.note_probe_failed();
            now += READER_CHECK_INTERVAL_MAX;
        }
        assert_eq!(h.check_interval, READER_CHECK_INTERVAL_MAX);
        // success snaps the interval back to the minimum
        h.note_probe_ok(now);
        assert_eq!(h.check_interval, READER_CHECK_INTERVAL_MIN);
    }

    #[test]
    fn test_probe_due_only_when_ready() {
        let mut h = ReaderHealth::default();
        let now = Instant::now();
        assert!(!h.probe_due(now));
        h.note_probe_ok(now);
        assert!(!h.probe_due(now));
        assert!(h.probe_due(now + READER_CHECK_INTERVAL_MIN));
    }

    #[test]
    fn test_reset_rate_limited_by_interval() {
        let mut h = ReaderHealth::default();
        let now = Instant::now();
        h.note_reset_pulse(now);
        assert!(!h.reset_due(now));
        assert!(h.reset_due(now + READER_CHECK_INTERVAL_MIN));
    }
}

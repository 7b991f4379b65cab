//! Windowed average request rate
//!
//! Converts a monotonically increasing counter (or a stream of increment
//! events) into requests per second, averaged over the wall-clock time since
//! the previous read. Every read atomically swaps out the previous count and
//! timestamp, so consecutive windows neither overlap nor leave gaps and
//! concurrent readers never count the same requests twice.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Requests per second for `delta` requests observed over `elapsed_secs`.
///
/// Zero only when there was no traffic at all; any traffic reports at least 1.
/// Rounds half up, so 149 requests over 10 seconds is 15 and 5 over 10 is 1.
pub fn rate_per_second(delta: u64, elapsed_secs: u64) -> u32 {
    if delta == 0 {
        return 0;
    }
    let elapsed = elapsed_secs.max(1) as u128;
    let rounded = (2 * delta as u128 + elapsed) / (2 * elapsed);
    rounded.clamp(1, u32::MAX as u128) as u32
}

/// Whole seconds between two millisecond timestamps, never less than 1
pub fn elapsed_seconds(previous_millis: i64, now_millis: i64) -> u64 {
    let elapsed_ms = now_millis.saturating_sub(previous_millis).max(0) as u64;
    (elapsed_ms / 1000).max(1)
}

/// Result of one read of the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReading {
    pub delta: u64,
    pub elapsed_secs: u64,
    pub rate: u32,
}

/// Lock-free rate accumulator
#[derive(Debug)]
pub struct RateWindow {
    /// Events recorded since the last event-mode read
    pending: AtomicU64,
    /// Absolute counter value seen at the last absolute-mode read
    last_count: AtomicU64,
    /// Timestamp of the last read (either mode)
    last_timestamp_ms: AtomicI64,
}

impl RateWindow {
    /// Create a window whose first interval starts at `now_millis`
    pub fn new(now_millis: i64) -> Self {
        Self {
            pending: AtomicU64::new(0),
            last_count: AtomicU64::new(0),
            last_timestamp_ms: AtomicI64::new(now_millis),
        }
    }

    /// Create a window for an absolute counter that already has a value
    pub fn starting_at(initial_count: u64, now_millis: i64) -> Self {
        let window = Self::new(now_millis);
        window.last_count.store(initial_count, Ordering::Release);
        window
    }

    /// Record a single observed request
    pub fn record_event(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Events recorded but not yet consumed by a read
    pub fn pending_events(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Timestamp at which the current window started
    pub fn last_timestamp_millis(&self) -> i64 {
        self.last_timestamp_ms.load(Ordering::Acquire)
    }

    /// Read the rate for an absolute counter value and start a new window.
    ///
    /// A counter that went backwards (host restart) reports 0 for that window.
    pub fn sample(&self, current_count: u64, now_millis: i64) -> WindowReading {
        let previous_count = self.last_count.swap(current_count, Ordering::AcqRel);
        let previous_ts = self.last_timestamp_ms.swap(now_millis, Ordering::AcqRel);
        self.reading(current_count.saturating_sub(previous_count), previous_ts, now_millis)
    }

    /// Read the rate of recorded events and start a new window
    pub fn sample_events(&self, now_millis: i64) -> WindowReading {
        let delta = self.pending.swap(0, Ordering::AcqRel);
        let previous_ts = self.last_timestamp_ms.swap(now_millis, Ordering::AcqRel);
        self.reading(delta, previous_ts, now_millis)
    }

    fn reading(&self, delta: u64, previous_ts: i64, now_millis: i64) -> WindowReading {
        let elapsed_secs = elapsed_seconds(previous_ts, now_millis);
        WindowReading {
            delta,
            elapsed_secs,
            rate: rate_per_second(delta, elapsed_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rate_is_zero_only_without_traffic() {
        for s in 1..=120u64 {
            assert_eq!(rate_per_second(0, s), 0);
            for d in 1..=500u64 {
                let rate = rate_per_second(d, s);
                assert!(rate >= 1, "delta {} over {}s gave 0", d, s);
                let expected = ((d as f64 / s as f64).round() as u32).max(1);
                assert_eq!(rate, expected, "delta {} over {}s", d, s);
            }
        }
    }

    #[test]
    fn test_rounds_rather_than_ceils() {
        assert_eq!(rate_per_second(150, 10), 15);
        assert_eq!(rate_per_second(149, 10), 15);
        assert_eq!(rate_per_second(144, 10), 14);
        assert_eq!(rate_per_second(141, 10), 14);
        assert_eq!(rate_per_second(5, 10), 1);
        assert_eq!(rate_per_second(1, 1), 1);
    }

    #[test]
    fn test_elapsed_seconds_floor() {
        assert_eq!(elapsed_seconds(1_000, 1_000), 1);
        assert_eq!(elapsed_seconds(1_000, 1_999), 1);
        assert_eq!(elapsed_seconds(0, 10_000), 10);
        assert_eq!(elapsed_seconds(0, 10_999), 10);
        // Clock stepped backwards
        assert_eq!(elapsed_seconds(5_000, 1_000), 1);
    }

    #[test]
    fn test_absolute_counter_scenario() {
        let window = RateWindow::new(0);

        assert_eq!(window.sample(0, 1_000).rate, 0);
        assert_eq!(window.sample(1, 2_000).rate, 1);
        assert_eq!(window.sample(151, 12_000).rate, 15);
        assert_eq!(window.sample(300, 22_000).rate, 15);

        let reading = window.sample(305, 32_000);
        assert_eq!(reading.delta, 5);
        assert_eq!(reading.elapsed_secs, 10);
        assert_eq!(reading.rate, 1);
    }

    #[test]
    fn test_second_immediate_read_is_empty() {
        let window = RateWindow::new(0);
        for _ in 0..42 {
            window.record_event();
        }
        let first = window.sample_events(5_000);
        assert_eq!(first.delta, 42);

        let second = window.sample_events(5_000);
        assert_eq!(second.delta, 0);
        assert_eq!(second.rate, 0);

        let absolute = RateWindow::starting_at(100, 0);
        absolute.sample(250, 1_000);
        let again = absolute.sample(250, 1_000);
        assert_eq!((again.delta, again.rate), (0, 0));
    }

    #[test]
    fn test_counter_reset_reports_zero() {
        let window = RateWindow::starting_at(1_000, 0);
        let reading = window.sample(10, 10_000);
        assert_eq!(reading.delta, 0);
        assert_eq!(reading.rate, 0);
    }

    #[test]
    fn test_concurrent_events_are_not_lost() {
        let window = Arc::new(RateWindow::new(0));
        let mut handles = Vec::new();
        let mut total = 0u64;

        for _ in 0..8 {
            let w = window.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    w.record_event();
                }
            }));
        }

        // Read concurrently with the writers
        for i in 1..=50 {
            total += window.sample_events(i * 1_000).delta;
        }
        for handle in handles {
            handle.join().unwrap();
        }
        total += window.sample_events(100_000).delta;

        assert_eq!(total, 80_000);
    }
}

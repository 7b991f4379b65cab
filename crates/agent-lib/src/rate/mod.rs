//! Request rate measurement
//!
//! This module provides the windowed-average rate algorithm and the
//! measurement sources the scheduler can be configured with:
//! - Polling of an externally exposed monotonic counter
//! - Live counting through a per-request entry point
//! - A synthetic generator for test signals

mod live;
mod polling;
mod synthetic;
mod window;

pub use live::{InstrumentationHook, LiveCountSource, RequestCounter};
pub use polling::{CounterLocator, CounterRegistry, PollingCounterSource, RegistryCounterLocator};
pub use synthetic::SyntheticSource;
pub use window::{elapsed_seconds, rate_per_second, RateWindow, WindowReading};

use crate::models::RateSample;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of one throughput sample per scheduler tick
///
/// Implementations must not block on I/O and must never panic for
/// recoverable conditions: anything that prevents a measurement is reported
/// as [`RateSample::Unavailable`].
pub trait RequestRateSource: Send + Sync {
    /// Measure the current request rate
    fn measure(&self) -> RateSample;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Wall-clock abstraction so windows can be driven deterministically in tests
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

//! Synthetic request rate for exercising sinks without real traffic

use super::{Clock, RequestRateSource};
use crate::models::RateSample;
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;

/// Random rate in `[min, max]`, plus `extra` during odd clock minutes.
///
/// The alternating bonus produces a visibly varying signal on dashboards
/// and autoscaler policies.
pub struct SyntheticSource {
    min: u32,
    max: u32,
    extra: u32,
    clock: Arc<dyn Clock>,
}

impl SyntheticSource {
    pub fn new(min: u32, max: u32, extra: u32, clock: Arc<dyn Clock>) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            extra,
            clock,
        }
    }

    /// The generator the agent binary runs with
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(10, 100, 100, clock)
    }

    fn is_odd_minute(&self) -> bool {
        let minute = self.clock.now_millis().div_euclid(60_000);
        minute % 2 != 0
    }
}

impl RequestRateSource for SyntheticSource {
    fn measure(&self) -> RateSample {
        let base = OsRng.gen_range(self.min..=self.max);
        let bonus = if self.is_odd_minute() { self.extra } else { 0 };
        RateSample::Available(base.saturating_add(bonus))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

//! Rate measurement from live per-request notifications
//!
//! The host process calls [`RequestCounter::increment_request_count`] once per
//! handled request, typically from middleware or from a hook installed by an
//! instrumentation facility. The rate is recomputed at most once per second,
//! independent of the reporting interval.

use super::{Clock, RateWindow, RequestRateSource};
use crate::models::RateSample;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Minimum window over which live counts are averaged
const MIN_WINDOW_MILLIS: i64 = 1_000;

/// Host facility able to call back into the agent for every request
pub trait InstrumentationHook: Send + Sync {
    /// Install `callback` so it is invoked once per observed request
    fn register(&self, callback: Arc<dyn Fn() + Send + Sync>) -> Result<()>;

    /// Whether request handlers that are already active can be retrofitted
    fn supports_retrofit(&self) -> bool {
        false
    }

    /// Retrofit the callback into already-active handlers, returning how many
    fn retrofit_active_call_sites(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Cheap, cloneable entry point for counting requests
#[derive(Clone)]
pub struct RequestCounter {
    window: Arc<RateWindow>,
}

impl RequestCounter {
    /// Record one handled request
    pub fn increment_request_count(&self) {
        self.window.record_event();
        trace!("Request counted");
    }

    /// Requests recorded since the last rate computation
    pub fn pending(&self) -> u64 {
        self.window.pending_events()
    }
}

/// Request rate from live per-request increments
pub struct LiveCountSource {
    window: Arc<RateWindow>,
    current_rps: AtomicU32,
    hook_registered: AtomicBool,
    retrofit_executed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl LiveCountSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            window: Arc::new(RateWindow::new(clock.now_millis())),
            current_rps: AtomicU32::new(0),
            hook_registered: AtomicBool::new(false),
            retrofit_executed: AtomicBool::new(false),
            clock,
        }
    }

    /// Handle the host uses to report requests
    pub fn counter(&self) -> RequestCounter {
        RequestCounter {
            window: self.window.clone(),
        }
    }

    /// Wire the counting callback into the host facility.
    ///
    /// Safe to call repeatedly: the callback is registered once and the
    /// retrofit pass runs at most once for the lifetime of this source.
    /// Failures are logged and never propagated to the host.
    pub fn initialize(&self, hook: &dyn InstrumentationHook) {
        if self
            .hook_registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let counter = self.counter();
            match hook.register(Arc::new(move || counter.increment_request_count())) {
                Ok(()) => info!("Request counting hook registered"),
                Err(e) => {
                    warn!(error = %e, "Failed to register request counting hook");
                    self.hook_registered.store(false, Ordering::Release);
                    return;
                }
            }
        } else {
            debug!("Request counting hook already registered, skipping");
        }

        if !hook.supports_retrofit() {
            info!("Retrofitting active request handlers not supported");
            return;
        }

        if self
            .retrofit_executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            match hook.retrofit_active_call_sites() {
                Ok(count) => info!(call_sites = count, "Retrofitted active request handlers"),
                Err(e) => warn!(error = %e, "Failed to retrofit active request handlers"),
            }
        } else {
            debug!("Retrofit pass already executed, skipping");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.hook_registered.load(Ordering::Acquire)
    }
}

impl RequestRateSource for LiveCountSource {
    fn measure(&self) -> RateSample {
        let now = self.clock.now_millis();
        if self.window.last_timestamp_millis() < now - MIN_WINDOW_MILLIS {
            let reading = self.window.sample_events(now);
            self.current_rps.store(reading.rate, Ordering::Release);
            debug!(
                requests = reading.delta,
                elapsed_secs = reading.elapsed_secs,
                rate = reading.rate,
                "Live request count window closed"
            );
        }
        RateSample::Available(self.current_rps.load(Ordering::Acquire))
    }

    fn name(&self) -> &str {
        "live-count"
    }
}

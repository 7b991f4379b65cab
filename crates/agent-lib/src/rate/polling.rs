//! Rate measurement by polling an externally exposed request counter
//!
//! The host registers its monotonic request counters (one per listener,
//! for example) in a [`CounterRegistry`]. The polling source looks the
//! counter up by name pattern on each tick until it appears, then caches
//! the handle and only reads it from then on.

use super::{Clock, RateWindow, RequestRateSource};
use crate::models::RateSample;
use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Discovery of an external counter
pub trait CounterLocator: Send + Sync {
    /// Stable handle to a located counter
    type Handle: Send + Sync;

    /// Find the counter; `Ok(None)` while it is not registered yet
    fn locate(&self) -> Result<Option<Self::Handle>>;

    /// Read the current absolute value through a handle
    fn read(&self, handle: &Self::Handle) -> Result<u64>;
}

/// Registry of named monotonic counters exposed by the host process
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<String, Arc<AtomicU64>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter under `name`, returning the shared cell to increment
    pub fn register(&self, name: impl Into<String>) -> Arc<AtomicU64> {
        let name = name.into();
        debug!(counter = %name, "Registering request counter");
        self.counters
            .entry(name)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Remove a counter
    pub fn unregister(&self, name: &str) -> Option<Arc<AtomicU64>> {
        debug!(counter = %name, "Unregistering request counter");
        self.counters.remove(name).map(|(_, v)| v)
    }

    /// Names matching `pattern`, sorted. A trailing `*` matches any suffix.
    pub fn find(&self, pattern: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .counters
            .iter()
            .filter(|entry| matches_pattern(entry.key(), pattern))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<AtomicU64>> {
        self.counters.get(name).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Locates a counter in a [`CounterRegistry`] by name pattern
pub struct RegistryCounterLocator {
    registry: Arc<CounterRegistry>,
    pattern: String,
}

impl RegistryCounterLocator {
    pub fn new(registry: Arc<CounterRegistry>, pattern: impl Into<String>) -> Self {
        Self {
            registry,
            pattern: pattern.into(),
        }
    }
}

impl CounterLocator for RegistryCounterLocator {
    type Handle = (String, Arc<AtomicU64>);

    fn locate(&self) -> Result<Option<Self::Handle>> {
        let names = self.registry.find(&self.pattern);
        let Some(first) = names.first() else {
            return Ok(None);
        };
        if names.len() > 1 {
            warn!(
                pattern = %self.pattern,
                matches = names.len(),
                using = %first,
                "Multiple counters match, using only the first"
            );
        }
        Ok(self.registry.get(first).map(|cell| (first.clone(), cell)))
    }

    fn read(&self, handle: &Self::Handle) -> Result<u64> {
        Ok(handle.1.load(Ordering::Acquire))
    }
}

/// Request rate from a polled absolute counter
///
/// The first successful read after the counter is located only records a
/// baseline and reports [`RateSample::Unavailable`], so that tick is skipped.
/// Rates start with the second read.
pub struct PollingCounterSource<L: CounterLocator> {
    locator: L,
    handle: OnceLock<L::Handle>,
    baseline_taken: AtomicBool,
    window: RateWindow,
    clock: Arc<dyn Clock>,
}

impl<L: CounterLocator> PollingCounterSource<L> {
    pub fn new(locator: L, clock: Arc<dyn Clock>) -> Self {
        let window = RateWindow::new(clock.now_millis());
        Self {
            locator,
            handle: OnceLock::new(),
            baseline_taken: AtomicBool::new(false),
            window,
            clock,
        }
    }

    /// Whether the counter has been located and cached
    pub fn is_located(&self) -> bool {
        self.handle.get().is_some()
    }

    fn try_measure(&self) -> Result<RateSample> {
        let handle = match self.handle.get() {
            Some(handle) => handle,
            None => {
                let Some(found) = self.locator.locate()? else {
                    info!("Request counter not registered yet");
                    return Ok(RateSample::Unavailable);
                };
                // Concurrent first lookups race here; the first set wins
                if self.handle.set(found).is_ok() {
                    info!("Request counter located, caching handle");
                }
                match self.handle.get() {
                    Some(handle) => handle,
                    None => return Ok(RateSample::Unavailable),
                }
            }
        };

        let count = self.locator.read(handle)?;
        let now = self.clock.now_millis();

        // The first read only establishes where the counter stands
        if self
            .baseline_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.window.sample(count, now);
            debug!(count = count, "Request counter baseline taken");
            return Ok(RateSample::Unavailable);
        }

        let reading = self.window.sample(count, now);
        debug!(
            delta = reading.delta,
            elapsed_secs = reading.elapsed_secs,
            rate = reading.rate,
            "Polled request counter"
        );
        Ok(RateSample::Available(reading.rate))
    }
}

impl<L: CounterLocator> RequestRateSource for PollingCounterSource<L> {
    fn measure(&self) -> RateSample {
        match self.try_measure() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Failed to read request counter");
                RateSample::Unavailable
            }
        }
    }

    fn name(&self) -> &str {
        "polling-counter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::ManualClock;
    use std::sync::atomic::AtomicUsize;

    struct CountingLocator {
        inner: RegistryCounterLocator,
        locate_calls: AtomicUsize,
    }

    impl CounterLocator for CountingLocator {
        type Handle = (String, Arc<AtomicU64>);

        fn locate(&self) -> Result<Option<Self::Handle>> {
            self.locate_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.locate()
        }

        fn read(&self, handle: &Self::Handle) -> Result<u64> {
            self.inner.read(handle)
        }
    }

    struct FailingLocator;

    impl CounterLocator for FailingLocator {
        type Handle = ();

        fn locate(&self) -> Result<Option<()>> {
            anyhow::bail!("runtime telemetry unavailable")
        }

        fn read(&self, _handle: &()) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_registry_pattern_matching() {
        let registry = CounterRegistry::new();
        registry.register("http-nio-8080");
        registry.register("http-nio-8443");
        registry.register("ajp-8009");

        assert_eq!(registry.find("http-nio-*"), vec!["http-nio-8080", "http-nio-8443"]);
        assert_eq!(registry.find("ajp-8009"), vec!["ajp-8009"]);
        assert!(registry.find("ajp").is_empty());
        assert_eq!(registry.find("*").len(), 3);
    }

    #[test]
    fn test_register_twice_returns_same_counter() {
        let registry = CounterRegistry::new();
        let a = registry.register("main");
        let b = registry.register("main");
        a.fetch_add(3, Ordering::SeqCst);
        assert_eq!(b.load(Ordering::SeqCst), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unavailable_until_registered() {
        let registry = Arc::new(CounterRegistry::new());
        let clock = Arc::new(ManualClock::new(0));
        let source = PollingCounterSource::new(
            RegistryCounterLocator::new(registry.clone(), "http-*"),
            clock.clone(),
        );

        assert_eq!(source.measure(), RateSample::Unavailable);
        assert!(!source.is_located());

        let counter = registry.register("http-8080");
        counter.store(5_000, Ordering::SeqCst);

        // Baseline read
        clock.advance_millis(10_000);
        assert_eq!(source.measure(), RateSample::Unavailable);
        assert!(source.is_located());

        counter.fetch_add(150, Ordering::SeqCst);
        clock.advance_millis(10_000);
        assert_eq!(source.measure(), RateSample::Available(15));

        clock.advance_millis(10_000);
        assert_eq!(source.measure(), RateSample::Available(0));
    }

    #[test]
    fn test_handle_is_cached_after_discovery() {
        let registry = Arc::new(CounterRegistry::new());
        registry.register("http-8080");
        let locator = CountingLocator {
            inner: RegistryCounterLocator::new(registry.clone(), "http-*"),
            locate_calls: AtomicUsize::new(0),
        };
        let source = PollingCounterSource::new(locator, Arc::new(ManualClock::new(0)));

        for _ in 0..5 {
            source.measure();
        }
        assert_eq!(source.locator.locate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_locator_errors_become_unavailable() {
        let source = PollingCounterSource::new(FailingLocator, Arc::new(ManualClock::new(0)));
        assert_eq!(source.measure(), RateSample::Unavailable);
        assert_eq!(source.name(), "polling-counter");
    }
}

//! Observability for the metrics agent itself
//!
//! Provides:
//! - Prometheus metrics about the reporting pipeline (ticks, skips, sink
//!   failures, last reported rate, tick duration)
//! - Structured JSON logging of lifecycle events with tracing
//!
//! Registration failures are logged and leave the affected metric unrecorded;
//! they never stop the agent.

use prometheus::core::Collector;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick duration (in seconds); ticks are bounded by
/// the per-sink HTTP timeout
const TICK_DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    ticks_total: Option<IntCounter>,
    skipped_ticks_total: Option<IntCounter>,
    sink_emits_total: Option<IntCounterVec>,
    sink_failures_total: Option<IntCounterVec>,
    last_reported_rate: Option<IntGauge>,
    active_sinks: Option<IntGauge>,
    tick_duration_seconds: Option<Histogram>,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            ticks_total: register(
                "ticks_total",
                IntCounter::new(
                    "cf_metrics_agent_ticks_total",
                    "Scheduler ticks that produced a sample",
                ),
            ),
            skipped_ticks_total: register(
                "skipped_ticks_total",
                IntCounter::new(
                    "cf_metrics_agent_skipped_ticks_total",
                    "Scheduler ticks skipped because no sample was available",
                ),
            ),
            sink_emits_total: register(
                "sink_emits_total",
                IntCounterVec::new(
                    Opts::new(
                        "cf_metrics_agent_sink_emits_total",
                        "Samples delivered successfully, per sink",
                    ),
                    &["sink"],
                ),
            ),
            sink_failures_total: register(
                "sink_failures_total",
                IntCounterVec::new(
                    Opts::new(
                        "cf_metrics_agent_sink_failures_total",
                        "Samples a sink failed to deliver, per sink",
                    ),
                    &["sink"],
                ),
            ),
            last_reported_rate: register(
                "last_reported_rate",
                IntGauge::new(
                    "cf_metrics_agent_last_reported_rps",
                    "Most recent request rate handed to the sinks",
                ),
            ),
            active_sinks: register(
                "active_sinks",
                IntGauge::new("cf_metrics_agent_active_sinks", "Number of active sinks"),
            ),
            tick_duration_seconds: register(
                "tick_duration_seconds",
                Histogram::with_opts(
                    HistogramOpts::new(
                        "cf_metrics_agent_tick_duration_seconds",
                        "Time spent measuring and emitting one tick",
                    )
                    .buckets(TICK_DURATION_BUCKETS.to_vec()),
                ),
            ),
        }
    }
}

fn register<C>(name: &str, collector: prometheus::Result<C>) -> Option<C>
where
    C: Collector + Clone + 'static,
{
    let collector = match collector {
        Ok(collector) => collector,
        Err(e) => {
            warn!(metric = %name, error = %e, "Failed to create metric");
            return None;
        }
    };
    if let Err(e) = prometheus::register(Box::new(collector.clone())) {
        warn!(metric = %name, error = %e, "Failed to register metric");
    }
    Some(collector)
}

/// Pipeline metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    inner: &'static AgentMetricsInner,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMetrics").finish_non_exhaustive()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(AgentMetricsInner::new),
        }
    }

    pub fn inc_ticks(&self) {
        if let Some(c) = &self.inner.ticks_total {
            c.inc();
        }
    }

    pub fn inc_skipped_ticks(&self) {
        if let Some(c) = &self.inner.skipped_ticks_total {
            c.inc();
        }
    }

    pub fn inc_sink_emits(&self, sink: &str) {
        if let Some(c) = &self.inner.sink_emits_total {
            c.with_label_values(&[sink]).inc();
        }
    }

    pub fn inc_sink_failures(&self, sink: &str) {
        if let Some(c) = &self.inner.sink_failures_total {
            c.with_label_values(&[sink]).inc();
        }
    }

    pub fn set_last_reported_rate(&self, rps: u32) {
        if let Some(g) = &self.inner.last_reported_rate {
            g.set(i64::from(rps));
        }
    }

    pub fn set_active_sinks(&self, count: usize) {
        if let Some(g) = &self.inner.active_sinks {
            g.set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        if let Some(h) = &self.inner.tick_duration_seconds {
            h.observe(duration_secs);
        }
    }

    /// Failures recorded so far for `sink`
    pub fn sink_failures(&self, sink: &str) -> u64 {
        self.inner
            .sink_failures_total
            .as_ref()
            .map(|c| c.with_label_values(&[sink]).get())
            .unwrap_or(0)
    }
}

/// Structured logger for agent lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    application: String,
    instance_index: u32,
}

impl StructuredLogger {
    pub fn new(application: impl Into<String>, instance_index: u32) -> Self {
        Self {
            application: application.into(),
            instance_index,
        }
    }

    /// Log agent startup with the sinks that will receive samples
    pub fn log_startup(&self, version: &str, auth_mode: &str, sinks: &[String]) {
        info!(
            event = "agent_started",
            application = %self.application,
            instance_index = self.instance_index,
            agent_version = %version,
            auth_mode = %auth_mode,
            sinks = ?sinks,
            "Metrics agent started"
        );
    }

    /// Log that the agent stays idle and never schedules work
    pub fn log_idle(&self, reason: &str) {
        info!(
            event = "agent_idle",
            application = %self.application,
            instance_index = self.instance_index,
            reason = %reason,
            "Metrics agent idle, nothing will be reported"
        );
    }

    pub fn log_sink_activated(&self, sink: &str, target: Option<&str>) {
        info!(
            event = "sink_activated",
            application = %self.application,
            sink = %sink,
            target = target.unwrap_or("-"),
            "Sink activated"
        );
    }

    pub fn log_sink_disabled(&self, sink: &str, reason: &str) {
        warn!(
            event = "sink_disabled",
            application = %self.application,
            sink = %sink,
            reason = %reason,
            "Sink disabled"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            application = %self.application,
            instance_index = self.instance_index,
            reason = %reason,
            "Metrics agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_handles_share_state() {
        let metrics = AgentMetrics::new();
        let other = AgentMetrics::new();

        let before = other.sink_failures("observability-test-sink");
        metrics.inc_sink_failures("observability-test-sink");
        assert_eq!(other.sink_failures("observability-test-sink"), before + 1);

        metrics.inc_ticks();
        metrics.inc_skipped_ticks();
        metrics.inc_sink_emits("observability-test-sink");
        metrics.set_last_reported_rate(12);
        metrics.set_active_sinks(2);
        metrics.observe_tick_duration(0.002);
    }

    #[test]
    fn test_metrics_are_exposed_in_default_registry() {
        AgentMetrics::new().inc_ticks();
        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"cf_metrics_agent_ticks_total".to_string()));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("orders", 3);
        assert_eq!(logger.application, "orders");
        assert_eq!(logger.instance_index, 3);
        logger.log_idle("no sinks configured");
    }
}

//! Reporting scheduler
//!
//! Ticks at a fixed interval after an initial warm-up delay. Each tick takes
//! one sample from the rate source and hands that same sample to every sink
//! in order. A sink that errors or panics is logged and skipped; the
//! remaining sinks still run. Unavailable samples skip the tick.

use crate::models::{RateSample, CUSTOM_THROUGHPUT_METRIC_NAME};
use crate::observability::AgentMetrics;
use crate::rate::RequestRateSource;
use crate::sinks::MetricSink;
use anyhow::Result;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Name of the dedicated scheduler thread
const SCHEDULER_THREAD_NAME: &str = "cf-metrics-scheduler";

/// Configuration for the reporting scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Reporting interval (default: 10 seconds)
    pub interval: Duration,
    /// Delay before the first tick (default: 30 seconds)
    pub initial_delay: Duration,
    /// Metric name handed to every sink
    pub metric_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(30),
            metric_name: CUSTOM_THROUGHPUT_METRIC_NAME.to_string(),
        }
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No sample was available; no sink was called
    Skipped,
    /// The sample was handed to every sink
    Emitted {
        value: u32,
        succeeded: usize,
        failed: usize,
    },
}

/// Periodically measures the request rate and fans it out to the sinks
pub struct MetricsScheduler {
    source: Arc<dyn RequestRateSource>,
    sinks: Vec<Arc<dyn MetricSink>>,
    config: SchedulerConfig,
    metrics: AgentMetrics,
}

impl MetricsScheduler {
    pub fn builder() -> MetricsSchedulerBuilder {
        MetricsSchedulerBuilder::new()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sink names in emission order
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Measure once and emit to all sinks sequentially
    pub async fn tick(&self) -> TickOutcome {
        let started = Instant::now();

        let sample = self.measure();
        let Some(value) = sample.value() else {
            info!(source = %self.source.name(), "Request rate not available, skipping tick");
            self.metrics.inc_skipped_ticks();
            return TickOutcome::Skipped;
        };

        debug!(
            source = %self.source.name(),
            metric = %self.config.metric_name,
            value = value,
            sinks = self.sinks.len(),
            "Emitting sample"
        );
        self.metrics.inc_ticks();
        self.metrics.set_last_reported_rate(value);

        let mut succeeded = 0;
        let mut failed = 0;
        for sink in &self.sinks {
            if self.emit_isolated(sink.clone(), value).await {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        self.metrics.observe_tick_duration(started.elapsed().as_secs_f64());
        TickOutcome::Emitted {
            value,
            succeeded,
            failed,
        }
    }

    fn measure(&self) -> RateSample {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.source.measure())) {
            Ok(sample) => sample,
            Err(_) => {
                error!(
                    source = %self.source.name(),
                    "Rate source panicked, treating as unavailable"
                );
                RateSample::Unavailable
            }
        }
    }

    /// Run one sink in its own task so a panic stays contained
    async fn emit_isolated(&self, sink: Arc<dyn MetricSink>, value: u32) -> bool {
        let name = sink.name().to_string();
        let metric_name = self.config.metric_name.clone();
        let task = tokio::spawn(async move { sink.emit(&metric_name, value).await });

        match task.await {
            Ok(Ok(())) => {
                self.metrics.inc_sink_emits(&name);
                true
            }
            Ok(Err(e)) => {
                warn!(sink = %name, error = %e, "Sink failed to emit sample");
                self.metrics.inc_sink_failures(&name);
                false
            }
            Err(e) => {
                error!(sink = %name, error = %e, "Sink task aborted");
                self.metrics.inc_sink_failures(&name);
                false
            }
        }
    }

    /// Tick until a shutdown signal arrives (or the sender is dropped)
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            initial_delay_secs = self.config.initial_delay.as_secs(),
            sinks = ?self.sink_names(),
            "Starting metrics reporting loop"
        );

        let start = Instant::now() + self.config.initial_delay;
        let mut ticker = interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down metrics reporting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Spawn the loop on the current tokio runtime, or on a dedicated
    /// thread when the caller is not inside one.
    ///
    /// Returns `None` without scheduling anything when there are no sinks.
    pub fn start(self) -> Option<SchedulerHandle> {
        if self.sinks.is_empty() {
            info!("No active sinks, scheduler not started");
            return None;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            info!("No tokio runtime in this context, using a dedicated scheduler thread");
            return self.start_on_thread();
        }
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        Some(SchedulerHandle {
            shutdown_tx,
            worker: Worker::Task(task),
        })
    }

    /// Run the loop on a dedicated thread with its own single-threaded
    /// runtime, for hosts that do not run tokio themselves.
    ///
    /// Returns `None` when there are no sinks or the thread cannot be spawned.
    pub fn start_on_thread(self) -> Option<SchedulerHandle> {
        if self.sinks.is_empty() {
            info!("No active sinks, scheduler not started");
            return None;
        }
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let spawned = std::thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run(shutdown_rx)),
                    Err(e) => error!(error = %e, "Failed to build scheduler runtime"),
                }
            });

        match spawned {
            Ok(thread) => Some(SchedulerHandle {
                shutdown_tx,
                worker: Worker::Thread(thread),
            }),
            Err(e) => {
                error!(error = %e, "Failed to spawn scheduler thread");
                None
            }
        }
    }
}

enum Worker {
    Task(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    worker: Worker,
}

impl SchedulerHandle {
    /// Stop scheduling new ticks; an in-flight tick may still finish
    pub fn signal_shutdown(&self) {
        // No receiver left means the loop already stopped
        let _ = self.shutdown_tx.send(());
    }

    /// Signal shutdown and wait for the loop to exit. Never fails.
    pub async fn shutdown(self) {
        self.signal_shutdown();
        match self.worker {
            Worker::Task(task) => {
                if let Err(e) = task.await {
                    warn!(error = %e, "Scheduler task ended abnormally");
                }
            }
            Worker::Thread(thread) => {
                match tokio::task::spawn_blocking(move || thread.join()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => warn!("Scheduler thread panicked"),
                    Err(e) => warn!(error = %e, "Failed to join scheduler thread"),
                }
            }
        }
        debug!("Scheduler stopped");
    }

    /// Blocking variant of [`SchedulerHandle::shutdown`] for callers outside
    /// an async context. A task-based scheduler is only signalled.
    pub fn shutdown_blocking(self) {
        self.signal_shutdown();
        if let Worker::Thread(thread) = self.worker {
            if thread.join().is_err() {
                warn!("Scheduler thread panicked");
            }
        }
    }
}

/// Builder for the reporting scheduler
pub struct MetricsSchedulerBuilder {
    source: Option<Arc<dyn RequestRateSource>>,
    sinks: Vec<Arc<dyn MetricSink>>,
    config: SchedulerConfig,
}

impl MetricsSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            sinks: Vec::new(),
            config: SchedulerConfig::default(),
        }
    }

    /// Set the rate source
    pub fn source(mut self, source: Arc<dyn RequestRateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Append a sink; sinks are emitted to in the order they are added
    pub fn sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn MetricSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// Set the reporting interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the warm-up delay before the first tick
    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.config.initial_delay = initial_delay;
        self
    }

    pub fn metric_name(mut self, metric_name: impl Into<String>) -> Self {
        self.config.metric_name = metric_name.into();
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<MetricsScheduler> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Rate source is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Reporting interval must be greater than zero");
        }

        Ok(MetricsScheduler {
            source,
            sinks: self.sinks,
            config: self.config,
            metrics: AgentMetrics::new(),
        })
    }
}

impl Default for MetricsSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

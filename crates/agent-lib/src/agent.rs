//! Agent bootstrap
//!
//! Discovers the application, decides which sinks are active and starts the
//! reporting scheduler. With no active sink the agent stays idle: no timer
//! is created and the measurement initializer is never run.

use crate::discovery::{
    discover_endpoint, discover_identity, otlp_endpoint, InstanceCredentialPaths, VariableLookup,
};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::policy::{build_sinks, plan_sinks, resolve_endpoint, AuthOverrides, SinkSettings};
use crate::rate::RequestRateSource;
use crate::scheduler::{MetricsScheduler, SchedulerConfig, SchedulerHandle};
use crate::sinks::environment_tag;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, warn};

/// Reported in the startup event
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings for one agent instance
#[derive(Debug, Clone, Default)]
pub struct AgentSettings {
    pub scheduler: SchedulerConfig,
    pub enable_log_emitter: bool,
    /// Name of the variable holding the OTLP `environment` attribute
    pub environment_var_name: Option<String>,
    pub overrides: AuthOverrides,
    /// Run the scheduler on its own thread instead of the current runtime
    pub dedicated_thread: bool,
}

/// A started agent
pub struct RunningAgent {
    handle: SchedulerHandle,
    logger: StructuredLogger,
    sinks: Vec<String>,
}

impl RunningAgent {
    /// Names of the active sinks, in emission order
    pub fn sink_names(&self) -> &[String] {
        &self.sinks
    }

    pub async fn shutdown(self, reason: &str) {
        self.logger.log_shutdown(reason);
        self.handle.shutdown().await;
    }

    pub fn shutdown_blocking(self, reason: &str) {
        self.logger.log_shutdown(reason);
        self.handle.shutdown_blocking();
    }
}

/// Start the agent.
///
/// `initialize` prepares the measurement source (for example installing a
/// live-count hook) and only runs once at least one sink is active and the
/// scheduler settings are valid. Without a tokio runtime in the calling
/// context the scheduler runs on its own thread.
/// Returns `Ok(None)` when the agent stays idle; errors only on invalid
/// scheduler settings.
pub fn start_agent<F>(
    settings: &AgentSettings,
    env: &dyn VariableLookup,
    source: Arc<dyn RequestRateSource>,
    initialize: F,
) -> Result<Option<RunningAgent>>
where
    F: FnOnce(),
{
    let identity = match discover_identity(env) {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "Cannot determine application identity, agent stays idle");
            return Ok(None);
        }
    };
    let logger = StructuredLogger::new(&identity.application_name, identity.instance_index);

    let discovered = discover_endpoint(env).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring autoscaler binding");
        Default::default()
    });
    let resolved = resolve_endpoint(
        discovered,
        InstanceCredentialPaths::from_env(env),
        &settings.overrides,
    );
    let auth_mode = resolved.auth_mode();

    let sink_settings = SinkSettings {
        otlp_url: otlp_endpoint(env),
        environment: environment_tag(env, settings.environment_var_name.as_deref()),
        enable_log_emitter: settings.enable_log_emitter,
    };
    let plan = plan_sinks(&resolved, &sink_settings);
    let sinks = build_sinks(&plan, &identity, &logger);

    let metrics = AgentMetrics::new();
    metrics.set_active_sinks(sinks.len());
    if sinks.is_empty() {
        logger.log_idle("no active sinks");
        return Ok(None);
    }

    let scheduler = MetricsScheduler::builder()
        .source(source)
        .sinks(sinks)
        .config(settings.scheduler.clone())
        .build()
        .context("Invalid scheduler settings")?;
    let sink_names = scheduler.sink_names();

    initialize();

    let handle = if settings.dedicated_thread {
        scheduler.start_on_thread()
    } else {
        scheduler.start()
    };
    let Some(handle) = handle else {
        logger.log_idle("scheduler could not be started");
        return Ok(None);
    };

    logger.log_startup(AGENT_VERSION, &auth_mode.to_string(), &sink_names);
    Ok(Some(RunningAgent {
        handle,
        logger,
        sinks: sink_names,
    }))
}

//! CF Metrics Agent - request throughput reporter
//!
//! Runs next to a Cloud Foundry application instance and periodically
//! reports a requests-per-second metric to the App Autoscaler, an OTLP
//! collector and/or the log.

use anyhow::{Context, Result};
use clap::Parser;
use metrics_agent_lib::discovery::ProcessEnvironment;
use metrics_agent_lib::rate::SyntheticSource;
use metrics_agent_lib::{start_agent, SystemClock};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::Args::parse();
    let config = config::AgentConfig::load(&args)?;

    // Initialize tracing with JSON output; RUST_LOG wins over the flags
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level())))
        .with(fmt::layer().json())
        .init();

    if config.disable_agent {
        info!("Metrics agent disabled by configuration");
        return Ok(());
    }

    info!(
        interval_secs = config.interval_seconds,
        initial_delay_secs = config.initial_delay_seconds,
        "Starting cf-metrics-agent"
    );

    let source = Arc::new(SyntheticSource::with_defaults(Arc::new(SystemClock)));
    let agent = start_agent(&config.agent_settings(), &ProcessEnvironment, source, || {
        info!(source = "synthetic", "Measurement source ready")
    })?;
    let Some(agent) = agent else {
        return Ok(());
    };

    let reason = shutdown_signal().await?;
    agent.shutdown(reason).await;
    info!("Shutting down");

    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        Ok("SIGINT received")
    }
}

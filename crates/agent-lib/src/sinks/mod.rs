//! Metric sinks
//!
//! A sink serializes one sample into its own wire format and delivers it.
//! Sinks fail independently: an error is returned to the scheduler, which
//! logs it and moves on to the next sink.

mod autoscaler;
mod http;
mod log;
mod otlp;

pub use autoscaler::{AutoscalerMetric, AutoscalerPayload, AutoscalerSink};
pub use http::{build_http_client, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
pub use log::LogSink;
pub use otlp::{environment_tag, OtlpSink};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for metric samples
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Sink name used in logs and metrics
    fn name(&self) -> &str;

    /// Deliver one metric value
    async fn emit(&self, metric_name: &str, value: u32) -> Result<(), SinkError>;
}

//! LogSink - writes samples to the agent's own log output

use super::{MetricSink, SinkError};
use async_trait::async_trait;
use tracing::info;

/// Sink that logs every sample; never fails
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricSink for LogSink {
    fn name(&self) -> &str {
        "log-emitter"
    }

    async fn emit(&self, metric_name: &str, value: u32) -> Result<(), SinkError> {
        info!(metric = %metric_name, value = value, "Metric sample");
        Ok(())
    }
}

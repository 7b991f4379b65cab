//! Custom-metrics submission to the Cloud Foundry app autoscaler

use super::http::{build_http_client, post_json};
use super::{MetricSink, SinkError};
use crate::models::ApplicationIdentity;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

const RPS_UNIT: &str = "rps";

/// Request body accepted by `POST /v1/apps/{app_id}/metrics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoscalerPayload {
    pub instance_index: u32,
    pub metrics: Vec<AutoscalerMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoscalerMetric {
    pub name: String,
    pub value: u32,
    pub unit: &'static str,
}

impl AutoscalerPayload {
    pub fn single(instance_index: u32, name: &str, value: u32) -> Self {
        Self {
            instance_index,
            metrics: vec![AutoscalerMetric {
                name: name.to_string(),
                value,
                unit: RPS_UNIT,
            }],
        }
    }
}

/// Posts samples to the autoscaler using Basic auth or mutual TLS
pub struct AutoscalerSink {
    client: Client,
    url: String,
    instance_index: u32,
    authorization: Option<String>,
}

impl AutoscalerSink {
    /// Sink authenticating with an `Authorization: Basic` header
    pub fn basic(
        base_url: &str,
        username: &str,
        password: &str,
        identity: &ApplicationIdentity,
    ) -> Result<Self, SinkError> {
        let credentials = STANDARD.encode(format!("{}:{}", username, password));
        Ok(Self {
            client: build_http_client(None)?,
            url: metrics_url(base_url, &identity.application_id),
            instance_index: identity.instance_index,
            authorization: Some(format!("Basic {}", credentials)),
        })
    }

    /// Sink authenticating with a client certificate; no Authorization header
    pub fn mtls(
        base_url: &str,
        tls: rustls::ClientConfig,
        identity: &ApplicationIdentity,
    ) -> Result<Self, SinkError> {
        Ok(Self {
            client: build_http_client(Some(tls))?,
            url: metrics_url(base_url, &identity.application_id),
            instance_index: identity.instance_index,
            authorization: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn uses_basic_auth(&self) -> bool {
        self.authorization.is_some()
    }
}

fn metrics_url(base_url: &str, application_id: &str) -> String {
    format!(
        "{}/v1/apps/{}/metrics",
        base_url.trim_end_matches('/'),
        application_id
    )
}

#[async_trait]
impl MetricSink for AutoscalerSink {
    fn name(&self) -> &str {
        "autoscaler"
    }

    #[instrument(name = "autoscaler_emit", skip(self), fields(url = %self.url))]
    async fn emit(&self, metric_name: &str, value: u32) -> Result<(), SinkError> {
        let payload = AutoscalerPayload::single(self.instance_index, metric_name, value);
        let body = serde_json::to_vec(&payload)?;
        post_json(&self.client, &self.url, body, self.authorization.as_deref()).await
    }
}

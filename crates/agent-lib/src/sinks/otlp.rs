//! OTLP over HTTP/JSON export of a single gauge data point

use super::http::{build_http_client, post_json};
use super::{MetricSink, SinkError};
use crate::discovery::VariableLookup;
use crate::models::ApplicationIdentity;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

const GAUGE_UNIT: &str = "1/s";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExportMetricsRequest<'a> {
    resource_metrics: Vec<ResourceMetrics<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetrics<'a> {
    resource: Resource<'a>,
    scope_metrics: Vec<ScopeMetrics<'a>>,
}

#[derive(Debug, Serialize)]
struct Resource<'a> {
    attributes: &'a [KeyValue],
}

#[derive(Debug, Serialize)]
struct ScopeMetrics<'a> {
    metrics: Vec<Metric<'a>>,
}

#[derive(Debug, Serialize)]
struct Metric<'a> {
    name: &'a str,
    unit: &'static str,
    gauge: Gauge,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Gauge {
    data_points: Vec<NumberDataPoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NumberDataPoint {
    as_double: f64,
    time_unix_nano: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct KeyValue {
    key: String,
    value: AnyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnyValue {
    string_value: String,
}

impl KeyValue {
    fn string(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: AnyValue {
                string_value: value.into(),
            },
        }
    }
}

/// Value of the environment tag, read from the variable named `var_name`
pub fn environment_tag(env: &dyn VariableLookup, var_name: Option<&str>) -> Option<String> {
    let var_name = var_name?;
    let value = env.get(var_name);
    if value.is_none() {
        debug!(var = %var_name, "Environment tag variable not set");
    }
    value
}

/// Exports samples as OTLP gauge points, unauthenticated
pub struct OtlpSink {
    client: Client,
    url: String,
    attributes: Vec<KeyValue>,
}

impl OtlpSink {
    pub fn new(
        url: impl Into<String>,
        identity: &ApplicationIdentity,
        environment: Option<String>,
    ) -> Result<Self, SinkError> {
        let mut attributes = vec![
            KeyValue::string("cf_application_name", &identity.application_name),
            KeyValue::string("cf_space_name", &identity.space_name),
            KeyValue::string("cf_organization_name", &identity.organization_name),
            KeyValue::string("cf_instance_index", identity.instance_index.to_string()),
        ];
        if let Some(environment) = environment {
            attributes.push(KeyValue::string("environment", environment));
        }

        Ok(Self {
            client: build_http_client(None)?,
            url: url.into(),
            attributes,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn request<'a>(
        &'a self,
        metric_name: &'a str,
        value: u32,
        time_unix_nano: u64,
    ) -> ExportMetricsRequest<'a> {
        ExportMetricsRequest {
            resource_metrics: vec![ResourceMetrics {
                resource: Resource {
                    attributes: &self.attributes,
                },
                scope_metrics: vec![ScopeMetrics {
                    metrics: vec![Metric {
                        name: metric_name,
                        unit: GAUGE_UNIT,
                        gauge: Gauge {
                            data_points: vec![NumberDataPoint {
                                as_double: f64::from(value),
                                time_unix_nano,
                            }],
                        },
                    }],
                }],
            }],
        }
    }
}

fn now_unix_nanos() -> u64 {
    let now = chrono::Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_millis().saturating_mul(1_000_000));
    u64::try_from(nanos).unwrap_or_default()
}

#[async_trait]
impl MetricSink for OtlpSink {
    fn name(&self) -> &str {
        "otlp"
    }

    #[instrument(name = "otlp_emit", skip(self), fields(url = %self.url))]
    async fn emit(&self, metric_name: &str, value: u32) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&self.request(metric_name, value, now_unix_nanos()))?;
        post_json(&self.client, &self.url, body, None).await
    }
}

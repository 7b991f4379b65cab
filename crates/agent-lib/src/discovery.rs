//! Cloud Foundry connection-metadata discovery
//!
//! Reads the application identity from `VCAP_APPLICATION` and
//! `CF_INSTANCE_INDEX`, the autoscaler endpoint from the `custom_metrics`
//! credentials in `VCAP_SERVICES`, and the instance identity certificate
//! from `CF_INSTANCE_CERT`, `CF_INSTANCE_KEY` and `CF_SYSTEM_CERT_PATH`.
//!
//! All lookups go through an injectable variable lookup so discovery can be
//! exercised without touching the process environment.

use crate::credentials::{AutoscalerEndpoint, MtlsCredential};
use crate::models::ApplicationIdentity;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

pub const VCAP_APPLICATION: &str = "VCAP_APPLICATION";
pub const VCAP_SERVICES: &str = "VCAP_SERVICES";
pub const CF_INSTANCE_INDEX: &str = "CF_INSTANCE_INDEX";
pub const CF_INSTANCE_CERT: &str = "CF_INSTANCE_CERT";
pub const CF_INSTANCE_KEY: &str = "CF_INSTANCE_KEY";
pub const CF_SYSTEM_CERT_PATH: &str = "CF_SYSTEM_CERT_PATH";
pub const OTLP_METRICS_URL: &str = "MANAGEMENT_OTLP_METRICS_EXPORT_URL";

const CUSTOM_METRICS_KEY: &str = "custom_metrics";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("environment variable {0} is not set")]
    MissingVariable(&'static str),

    #[error("{variable} is not valid JSON: {source}")]
    MalformedJson {
        variable: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid instance index {0:?}")]
    InvalidInstanceIndex(String),
}

#[derive(Debug, Deserialize)]
struct VcapApplication {
    application_id: String,
    application_name: String,
    space_name: String,
    organization_name: String,
}

/// Source of environment variable values
pub trait VariableLookup {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl VariableLookup for ProcessEnvironment {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl<F> VariableLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// Identity of this application instance
pub fn discover_identity(env: &dyn VariableLookup) -> Result<ApplicationIdentity, DiscoveryError> {
    let vcap_application = env
        .get(VCAP_APPLICATION)
        .ok_or(DiscoveryError::MissingVariable(VCAP_APPLICATION))?;
    let instance_index = env
        .get(CF_INSTANCE_INDEX)
        .ok_or(DiscoveryError::MissingVariable(CF_INSTANCE_INDEX))?;
    parse_identity(&vcap_application, &instance_index)
}

pub fn parse_identity(
    vcap_application: &str,
    instance_index: &str,
) -> Result<ApplicationIdentity, DiscoveryError> {
    let app: VcapApplication =
        serde_json::from_str(vcap_application).map_err(|source| DiscoveryError::MalformedJson {
            variable: VCAP_APPLICATION,
            source,
        })?;
    let index = instance_index
        .trim()
        .parse::<u32>()
        .map_err(|_| DiscoveryError::InvalidInstanceIndex(instance_index.to_string()))?;

    Ok(ApplicationIdentity::new(
        app.application_id,
        index,
        app.application_name,
        app.space_name,
        app.organization_name,
    ))
}

/// Autoscaler endpoint from the service bindings; empty when unbound
pub fn discover_endpoint(env: &dyn VariableLookup) -> Result<AutoscalerEndpoint, DiscoveryError> {
    match env.get(VCAP_SERVICES) {
        Some(json) => parse_endpoint(&json),
        None => {
            info!("VCAP_SERVICES not set, no autoscaler binding");
            Ok(AutoscalerEndpoint::default())
        }
    }
}

/// Extract the first `custom_metrics` object found anywhere in the document
pub fn parse_endpoint(vcap_services: &str) -> Result<AutoscalerEndpoint, DiscoveryError> {
    let doc: Value =
        serde_json::from_str(vcap_services).map_err(|source| DiscoveryError::MalformedJson {
            variable: VCAP_SERVICES,
            source,
        })?;

    let Some(custom_metrics) = find_custom_metrics(&doc) else {
        debug!("No 'custom_metrics' credentials in VCAP_SERVICES");
        return Ok(AutoscalerEndpoint::default());
    };

    let field = |key: &str| {
        let value = custom_metrics
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if value.is_none() {
            debug!(key = %key, "Field not found in 'custom_metrics' within VCAP_SERVICES");
        }
        value
    };

    Ok(AutoscalerEndpoint {
        url: field("url"),
        username: field("username"),
        password: field("password"),
        mtls_url: field("mtls_url"),
    })
}

fn find_custom_metrics(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(found)) = map.get(CUSTOM_METRICS_KEY) {
                return Some(found);
            }
            map.values().find_map(find_custom_metrics)
        }
        Value::Array(items) => items.iter().find_map(find_custom_metrics),
        _ => None,
    }
}

/// Paths of the instance identity certificate, key and CA directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceCredentialPaths {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca_dir: Option<PathBuf>,
}

impl InstanceCredentialPaths {
    pub fn from_env(env: &dyn VariableLookup) -> Self {
        Self {
            cert: env.get(CF_INSTANCE_CERT).map(PathBuf::from),
            key: env.get(CF_INSTANCE_KEY).map(PathBuf::from),
            ca_dir: env.get(CF_SYSTEM_CERT_PATH).map(PathBuf::from),
        }
    }

    /// Read the credential files once
    pub fn load(&self) -> MtlsCredential {
        MtlsCredential::from_instance_paths(
            self.cert.as_deref(),
            self.key.as_deref(),
            self.ca_dir.as_deref(),
        )
    }
}

/// Configured OTLP metrics endpoint, if any
pub fn otlp_endpoint(env: &dyn VariableLookup) -> Option<String> {
    env.get(OTLP_METRICS_URL)
}

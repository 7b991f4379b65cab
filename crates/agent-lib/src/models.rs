//! Core data models for the metrics agent

use serde::{Deserialize, Serialize};

/// Name under which the throughput metric is published to every sink
pub const CUSTOM_THROUGHPUT_METRIC_NAME: &str = "custom_throughput";

/// Identity of the monitored application instance
///
/// Created once at startup from discovery data and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub application_id: String,
    pub instance_index: u32,
    pub application_name: String,
    pub space_name: String,
    pub organization_name: String,
}

impl ApplicationIdentity {
    pub fn new(
        application_id: impl Into<String>,
        instance_index: u32,
        application_name: impl Into<String>,
        space_name: impl Into<String>,
        organization_name: impl Into<String>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            instance_index,
            application_name: application_name.into(),
            space_name: space_name.into(),
            organization_name: organization_name.into(),
        }
    }
}

/// One throughput measurement, produced per scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSample {
    /// Requests per second over the last window
    Available(u32),
    /// The source could not produce a value this tick
    Unavailable,
}

impl RateSample {
    pub fn value(&self) -> Option<u32> {
        match self {
            RateSample::Available(rps) => Some(*rps),
            RateSample::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, RateSample::Available(_))
    }
}

impl std::fmt::Display for RateSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateSample::Available(rps) => write!(f, "{} rps", rps),
            RateSample::Unavailable => write!(f, "unavailable"),
        }
    }
}

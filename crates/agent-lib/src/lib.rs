//! Agent library for request-throughput reporting
//!
//! This crate provides the core functionality for:
//! - Measuring the request rate of the host process
//! - Reporting it to the autoscaler, an OTLP collector or the log
//! - Loading mTLS credentials, including PKCS#1 private keys
//! - Cloud Foundry connection-metadata discovery and observability

pub mod agent;
pub mod credentials;
pub mod discovery;
pub mod keys;
pub mod models;
pub mod observability;
pub mod policy;
pub mod rate;
pub mod scheduler;
pub mod sinks;
pub mod tls;

pub use agent::{start_agent, AgentSettings, RunningAgent, AGENT_VERSION};
pub use credentials::{AuthMode, AutoscalerEndpoint, MtlsCredential, MtlsMaterial};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use rate::{Clock, RequestRateSource, SystemClock};
pub use scheduler::{MetricsScheduler, SchedulerConfig, SchedulerHandle, TickOutcome};
pub use sinks::{MetricSink, SinkError};

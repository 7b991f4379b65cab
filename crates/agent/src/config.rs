//! Agent configuration
//!
//! Values come from `CME_`-prefixed environment variables and are then
//! overridden by command-line flags.

use anyhow::{Context, Result};
use clap::Parser;
use metrics_agent_lib::policy::AuthOverrides;
use metrics_agent_lib::{AgentSettings, SchedulerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "CME";

/// Command-line flags
#[derive(Debug, Default, Parser)]
#[command(name = "cf-metrics-agent")]
#[command(author, version, about = "Reports request throughput to the App Autoscaler", long_about = None)]
pub struct Args {
    /// Reporting interval in seconds
    #[arg(long, short)]
    pub interval_seconds: Option<u64>,

    /// Delay before the first report in seconds
    #[arg(long)]
    pub initial_delay_seconds: Option<u64>,

    /// Also write every sample to the log
    #[arg(long)]
    pub enable_log_emitter: bool,

    /// Variable whose value becomes the OTLP `environment` attribute
    #[arg(long, short)]
    pub environment_var_name: Option<String>,

    /// Exit without reporting anything
    #[arg(long)]
    pub disable_agent: bool,

    #[arg(long, short)]
    pub debug: bool,

    #[arg(long)]
    pub trace: bool,

    /// Autoscaler URL for Basic auth, overrides the service binding
    #[arg(long)]
    pub basic_url: Option<String>,

    #[arg(long)]
    pub basic_username: Option<String>,

    #[arg(long)]
    pub basic_password: Option<String>,

    /// Autoscaler URL for mutual TLS, overrides the service binding
    #[arg(long)]
    pub mtls_url: Option<String>,

    #[arg(long)]
    pub mtls_cert_path: Option<PathBuf>,

    #[arg(long)]
    pub mtls_key_path: Option<PathBuf>,

    /// Directory of `*.crt` CA certificates
    #[arg(long)]
    pub mtls_ca_dir: Option<PathBuf>,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_initial_delay_seconds")]
    pub initial_delay_seconds: u64,

    #[serde(default)]
    pub enable_log_emitter: bool,

    #[serde(default)]
    pub environment_var_name: Option<String>,

    #[serde(default)]
    pub disable_agent: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub trace: bool,

    #[serde(default)]
    pub basic_url: Option<String>,
    #[serde(default)]
    pub basic_username: Option<String>,
    #[serde(default)]
    pub basic_password: Option<String>,
    #[serde(default)]
    pub mtls_url: Option<String>,
    #[serde(default)]
    pub mtls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub mtls_key_path: Option<PathBuf>,
    #[serde(default)]
    pub mtls_ca_dir: Option<PathBuf>,
}

fn default_interval_seconds() -> u64 {
    10
}

fn default_initial_delay_seconds() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from the environment, then apply `args`
    pub fn load(args: &Args) -> Result<Self> {
        let mut config =
            Self::from_environment(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))?;
        config.apply_args(args);
        Ok(config)
    }

    fn from_environment(source: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(interval) = args.interval_seconds {
            self.interval_seconds = interval;
        }
        if let Some(delay) = args.initial_delay_seconds {
            self.initial_delay_seconds = delay;
        }
        self.enable_log_emitter |= args.enable_log_emitter;
        self.disable_agent |= args.disable_agent;
        self.debug |= args.debug;
        self.trace |= args.trace;

        let overrides = [
            (&mut self.environment_var_name, &args.environment_var_name),
            (&mut self.basic_url, &args.basic_url),
            (&mut self.basic_username, &args.basic_username),
            (&mut self.basic_password, &args.basic_password),
            (&mut self.mtls_url, &args.mtls_url),
        ];
        for (target, value) in overrides {
            if value.is_some() {
                target.clone_from(value);
            }
        }

        let paths = [
            (&mut self.mtls_cert_path, &args.mtls_cert_path),
            (&mut self.mtls_key_path, &args.mtls_key_path),
            (&mut self.mtls_ca_dir, &args.mtls_ca_dir),
        ];
        for (target, value) in paths {
            if value.is_some() {
                target.clone_from(value);
            }
        }
    }

    /// Default tracing filter when `RUST_LOG` is not set
    pub fn log_level(&self) -> &'static str {
        if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(self.interval_seconds),
                initial_delay: Duration::from_secs(self.initial_delay_seconds),
                ..Default::default()
            },
            enable_log_emitter: self.enable_log_emitter,
            environment_var_name: self.environment_var_name.clone(),
            overrides: AuthOverrides {
                basic_url: self.basic_url.clone(),
                basic_username: self.basic_username.clone(),
                basic_password: self.basic_password.clone(),
                mtls_url: self.mtls_url.clone(),
                mtls_cert_path: self.mtls_cert_path.clone(),
                mtls_key_path: self.mtls_key_path.clone(),
                mtls_ca_dir: self.mtls_ca_dir.clone(),
            },
            dedicated_thread: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> AgentConfig {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_environment(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(source)),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]);
        assert_eq!(config.interval_seconds, 10);
        assert_eq!(config.initial_delay_seconds, 30);
        assert!(!config.enable_log_emitter);
        assert!(!config.disable_agent);
        assert!(config.environment_var_name.is_none());
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_environment_values() {
        let config = from_vars(&[
            ("CME_INTERVAL_SECONDS", "15"),
            ("CME_ENABLE_LOG_EMITTER", "true"),
            ("CME_ENVIRONMENT_VAR_NAME", "DEPLOY_ENV"),
            ("CME_DEBUG", "true"),
        ]);
        assert_eq!(config.interval_seconds, 15);
        assert!(config.enable_log_emitter);
        assert_eq!(config.environment_var_name.as_deref(), Some("DEPLOY_ENV"));
        assert_eq!(config.log_level(), "debug");
    }

    #[test]
    fn test_flags_override_environment() {
        let mut config = from_vars(&[("CME_INTERVAL_SECONDS", "15"), ("CME_MTLS_URL", "https://a")]);
        let args = Args::parse_from([
            "cf-metrics-agent",
            "-i",
            "5",
            "--initial-delay-seconds",
            "0",
            "--trace",
            "--mtls-url",
            "https://b",
            "--mtls-ca-dir",
            "/etc/ssl/certs",
        ]);
        config.apply_args(&args);

        assert_eq!(config.interval_seconds, 5);
        assert_eq!(config.initial_delay_seconds, 0);
        assert_eq!(config.log_level(), "trace");
        assert_eq!(config.mtls_url.as_deref(), Some("https://b"));
        assert_eq!(config.mtls_ca_dir, Some(PathBuf::from("/etc/ssl/certs")));
    }

    #[test]
    fn test_absent_flags_keep_environment() {
        let mut config = from_vars(&[
            ("CME_BASIC_URL", "https://autoscaler"),
            ("CME_DISABLE_AGENT", "true"),
        ]);
        config.apply_args(&Args::default());

        assert_eq!(config.basic_url.as_deref(), Some("https://autoscaler"));
        assert!(config.disable_agent);
    }

    #[test]
    fn test_agent_settings() {
        let mut config = from_vars(&[]);
        config.apply_args(&Args::parse_from([
            "cf-metrics-agent",
            "--enable-log-emitter",
            "-e",
            "DEPLOY_ENV",
            "--basic-url",
            "https://autoscaler",
            "--basic-username",
            "user",
        ]));
        let settings = config.agent_settings();

        assert_eq!(settings.scheduler.interval, Duration::from_secs(10));
        assert_eq!(settings.scheduler.initial_delay, Duration::from_secs(30));
        assert_eq!(settings.scheduler.metric_name, "custom_throughput");
        assert!(settings.enable_log_emitter);
        assert_eq!(settings.environment_var_name.as_deref(), Some("DEPLOY_ENV"));
        assert_eq!(
            settings.overrides.basic_url.as_deref(),
            Some("https://autoscaler")
        );
        assert!(settings.overrides.basic_password.is_none());
    }
}

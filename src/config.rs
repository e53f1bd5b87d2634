use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

use crate::client::{ClientConfig, PoolConfig};
use crate::config_merge::{ConfigDefaults, ConfigMerger};
use crate::config_validation::UrlValidator;
use crate::invoker::RequestTemplate;
use crate::plan::{PlanError, RunPlan};
use crate::think_time::ThinkTime;
use crate::utils::format_duration;
use crate::yaml_config::YamlConfig;

/// Anything that stops a run from starting.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Invalid stage plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Invalid client settings: {0}")]
    Client(String),
}

/// Scheduler and shutdown timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    /// How often the scheduler re-applies the plan's target
    pub tick_interval: Duration,

    /// How long a user told to stop during ramp-down may finish its iteration
    pub graceful_ramp_down: Duration,

    /// How long all users get to finish once the run ends
    pub graceful_stop: Duration,

    /// Spacing of live progress log lines
    pub progress_interval: Duration,

    /// Hard cap on the running phase, if any
    pub max_duration: Option<Duration>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            tick_interval: ConfigDefaults::tick_interval(),
            graceful_ramp_down: ConfigDefaults::graceful_ramp_down(),
            graceful_stop: ConfigDefaults::graceful_stop(),
            progress_interval: ConfigDefaults::progress_interval(),
            max_duration: None,
        }
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: Option<String>,
    pub target_url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub pool: PoolConfig,
    pub plan: RunPlan,
    pub think_time: ThinkTime,
    pub execution: ExecutionSettings,
    pub max_error_rate: Option<f64>,
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Reads, validates and resolves a run file, applying env overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        Self::from_yaml_with_env_overrides(&yaml)
    }

    /// Resolves a parsed run file. Precedence: env > yaml > default.
    pub fn from_yaml_with_env_overrides(yaml: &YamlConfig) -> Result<Self, ConfigError> {
        let target = &yaml.target;

        let target_url = ConfigMerger::merge_string(
            Some(target.url.clone()),
            "TARGET_URL",
            String::new(),
        );
        UrlValidator::validate(&target_url)
            .map_err(|e| ConfigError::Validation(format!("TARGET_URL: {}", e)))?;

        let request_timeout = ConfigMerger::merge_duration(
            target.timeout.as_ref().map(|t| t.to_std_duration()).transpose()?,
            "REQUEST_TIMEOUT",
            ConfigDefaults::request_timeout(),
        );
        if request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        let think_time = ConfigMerger::merge_think_time(
            yaml.workload
                .think_time
                .as_ref()
                .map(|t| t.to_think_time())
                .transpose()?,
            "THINK_TIME",
        );

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_idle_per_host: target
                .pool
                .max_idle_per_host
                .unwrap_or(defaults.max_idle_per_host),
            idle_timeout: match &target.pool.idle_timeout {
                Some(d) => d.to_std_duration()?,
                None => defaults.idle_timeout,
            },
            tcp_keepalive: match &target.pool.tcp_keepalive {
                Some(d) => Some(d.to_std_duration()?),
                None => defaults.tcp_keepalive,
            },
        };

        let execution = &yaml.execution;
        let resolve = |value: &Option<crate::yaml_config::YamlDuration>,
                       default: Duration|
         -> Result<Duration, ConfigError> {
            match value {
                Some(d) => d.to_std_duration(),
                None => Ok(default),
            }
        };
        let execution = ExecutionSettings {
            tick_interval: resolve(&execution.tick_interval, ConfigDefaults::tick_interval())?,
            graceful_ramp_down: resolve(
                &execution.graceful_ramp_down,
                ConfigDefaults::graceful_ramp_down(),
            )?,
            graceful_stop: resolve(&execution.graceful_stop, ConfigDefaults::graceful_stop())?,
            progress_interval: resolve(
                &execution.progress_interval,
                ConfigDefaults::progress_interval(),
            )?,
            max_duration: execution
                .max_duration
                .as_ref()
                .map(|d| d.to_std_duration())
                .transpose()?,
        };

        Ok(Config {
            name: yaml.metadata.name.clone(),
            target_url,
            method: target.method.trim().to_uppercase(),
            headers: target.headers.clone(),
            body: target.body.clone(),
            request_timeout,
            skip_tls_verify: ConfigMerger::merge_bool(
                target.skip_tls_verify,
                "SKIP_TLS_VERIFY",
                ConfigDefaults::skip_tls_verify(),
            ),
            resolve_target_addr: ConfigMerger::merge_optional_string(
                target.resolve.clone(),
                "RESOLVE_TARGET_ADDR",
            ),
            client_cert_path: target.client_cert.clone(),
            client_key_path: target.client_key.clone(),
            pool,
            plan: yaml.to_run_plan()?,
            think_time,
            execution,
            max_error_rate: ConfigMerger::merge_rate(
                yaml.thresholds.max_error_rate,
                "MAX_ERROR_RATE",
            ),
            metrics_port: ConfigMerger::merge_port(yaml.metrics.port, "METRICS_PORT"),
        })
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            resolve_target_addr: self.resolve_target_addr.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            pool: self.pool.clone(),
        }
    }

    /// The request every iteration sends.
    pub fn request_template(&self) -> Result<RequestTemplate, ConfigError> {
        RequestTemplate::new(&self.method, &self.target_url, &self.headers, self.body.clone())
    }

    /// Logs the resolved configuration.
    pub fn log_summary(&self) {
        info!(
            name = self.name.as_deref().unwrap_or("unnamed"),
            target = %self.target_url,
            method = %self.method,
            request_timeout = %format_duration(self.request_timeout),
            think_time = ?self.think_time,
            stages = self.plan.stages().len(),
            total_duration = %format_duration(self.plan.total_duration()),
            peak_target = self.plan.peak_target(),
            interpolation = %self.plan.interpolation(),
            skip_tls_verify = self.skip_tls_verify,
            mtls = self.client_cert_path.is_some() && self.client_key_path.is_some(),
            max_error_rate = ?self.max_error_rate,
            "Resolved run configuration"
        );
    }

    /// Human-readable description of the run, used by `validate`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            out.push_str(&format!("Run: {}\n", name));
        }
        out.push_str(&format!("  Target:           {} {}\n", self.method, self.target_url));
        out.push_str(&format!(
            "  Request timeout:  {}\n",
            format_duration(self.request_timeout)
        ));
        let think = match &self.think_time {
            ThinkTime::Fixed(d) => format_duration(*d),
            ThinkTime::Random { min, max } => {
                format!("{}..{}", format_duration(*min), format_duration(*max))
            }
        };
        out.push_str(&format!("  Think time:       {}\n", think));
        out.push_str(&format!("  Plan:             {}\n", self.plan));
        out.push_str(&format!(
            "  Graceful stop:    ramp-down {}, end {}\n",
            format_duration(self.execution.graceful_ramp_down),
            format_duration(self.execution.graceful_stop)
        ));
        if let Some(max) = self.execution.max_duration {
            out.push_str(&format!("  Max duration:     {}\n", format_duration(max)));
        }
        if let Some(rate) = self.max_error_rate {
            out.push_str(&format!("  Max error rate:   {:.2}%\n", rate * 100.0));
        }
        out
    }
}

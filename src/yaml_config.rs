//! YAML run file schema.
//!
//! A run file names the target, the stage plan, the workload pause and the
//! execution knobs. Everything except `target.url` and `stages` has a default.
//! Parsing validates the whole document and reports every bad field at once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;

use crate::config::ConfigError;
use crate::config_merge::ConfigDefaults;
use crate::config_validation::{
    HttpMethodValidator, RangeValidator, TlsPairValidator, UrlValidator, ValidationContext,
    VersionValidator,
};
use crate::plan::{Interpolation, RunPlan, Stage, MAX_PLAN_DURATION};
use crate::think_time::ThinkTime;

/// Upper bound accepted for any stage target.
pub const MAX_STAGE_TARGET: i64 = 1_000_000;

/// Duration format for YAML (e.g., "30s", "5m", "1m30s", or bare seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, ConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| ConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

/// Metadata about the run file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// HTTP connection pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlPool {
    pub max_idle_per_host: Option<usize>,
    pub idle_timeout: Option<YamlDuration>,
    pub tcp_keepalive: Option<YamlDuration>,
}

/// The endpoint every iteration invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlTarget {
    pub url: String,

    #[serde(default = "ConfigDefaults::method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub body: Option<String>,

    /// Per-request timeout
    pub timeout: Option<YamlDuration>,

    pub skip_tls_verify: Option<bool>,

    /// DNS override in `host:ip:port` form
    pub resolve: Option<String>,

    pub client_cert: Option<String>,
    pub client_key: Option<String>,

    #[serde(default)]
    pub pool: YamlPool,
}

/// One stage of the concurrency ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlStage {
    pub duration: YamlDuration,
    pub target: i64,
    pub interpolation: Option<Interpolation>,
}

/// Think time configuration in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlThinkTime {
    /// Fixed think time (e.g., "1s")
    Fixed(YamlDuration),

    /// Uniformly random think time between min and max
    Random {
        min: YamlDuration,
        max: YamlDuration,
    },
}

impl YamlThinkTime {
    pub fn to_think_time(&self) -> Result<ThinkTime, ConfigError> {
        match self {
            YamlThinkTime::Fixed(duration) => Ok(ThinkTime::Fixed(duration.to_std_duration()?)),
            YamlThinkTime::Random { min, max } => Ok(ThinkTime::Random {
                min: min.to_std_duration()?,
                max: max.to_std_duration()?,
            }),
        }
    }
}

/// What each virtual user does between invocations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlWorkload {
    pub think_time: Option<YamlThinkTime>,
}

/// Scheduler and shutdown knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlExecution {
    pub start_target: Option<i64>,
    pub interpolation: Option<Interpolation>,
    pub tick_interval: Option<YamlDuration>,
    pub graceful_ramp_down: Option<YamlDuration>,
    pub graceful_stop: Option<YamlDuration>,
    pub progress_interval: Option<YamlDuration>,
    pub max_duration: Option<YamlDuration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlThresholds {
    /// Fail the run when failed/total exceeds this fraction
    pub max_error_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlMetrics {
    pub port: Option<u16>,
}

/// Root YAML configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub metadata: YamlMetadata,

    pub target: YamlTarget,

    pub stages: Vec<YamlStage>,

    #[serde(default)]
    pub workload: YamlWorkload,

    #[serde(default)]
    pub execution: YamlExecution,

    #[serde(default)]
    pub thresholds: YamlThresholds,

    #[serde(default)]
    pub metrics: YamlMetrics,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut ctx = ValidationContext::new();

        ctx.enter("version");
        ctx.check(VersionValidator::validate(&self.version));
        ctx.exit();

        self.validate_target(&mut ctx);
        self.validate_stages(&mut ctx);

        ctx.enter("workload");
        if let Some(think_time) = &self.workload.think_time {
            ctx.enter("thinkTime");
            match think_time.to_think_time() {
                Ok(ThinkTime::Random { min, max }) if min > max => {
                    ctx.field_error(format!(
                        "min ({:?}) must not be greater than max ({:?})",
                        min, max
                    ));
                }
                Ok(_) => {}
                Err(e) => ctx.field_error(e.to_string()),
            }
            ctx.exit();
        }
        ctx.exit();

        self.validate_execution(&mut ctx);

        ctx.enter("thresholds");
        if let Some(rate) = self.thresholds.max_error_rate {
            ctx.enter("maxErrorRate");
            ctx.check(RangeValidator::validate_f64(rate, 0.0, 1.0, "maxErrorRate"));
            ctx.exit();
        }
        ctx.exit();

        ctx.into_result()
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    fn validate_target(&self, ctx: &mut ValidationContext) {
        let target = &self.target;
        ctx.enter("target");

        ctx.enter("url");
        ctx.check(UrlValidator::validate(&target.url));
        ctx.exit();

        ctx.enter("method");
        ctx.check(HttpMethodValidator::validate(&target.method));
        ctx.exit();

        if let Some(timeout) = &target.timeout {
            ctx.enter("timeout");
            check_duration(ctx, timeout, "timeout", MIN_POSITIVE);
            ctx.exit();
        }

        ctx.check(TlsPairValidator::validate(
            target.client_cert.as_deref(),
            target.client_key.as_deref(),
        ));

        if let Some(resolve) = &target.resolve {
            ctx.enter("resolve");
            if resolve.split(':').count() != 3 {
                ctx.field_error(format!("expected 'host:ip:port', got '{}'", resolve));
            }
            ctx.exit();
        }

        ctx.enter("pool");
        for (field, value) in [
            ("idleTimeout", &target.pool.idle_timeout),
            ("tcpKeepalive", &target.pool.tcp_keepalive),
        ] {
            if let Some(duration) = value {
                ctx.enter(field);
                check_duration(ctx, duration, field, StdDuration::ZERO);
                ctx.exit();
            }
        }
        ctx.exit();

        ctx.exit(); // target
    }

    fn validate_stages(&self, ctx: &mut ValidationContext) {
        ctx.enter("stages");
        if self.stages.is_empty() {
            ctx.field_error("At least one stage must be defined".to_string());
        }

        for (idx, stage) in self.stages.iter().enumerate() {
            ctx.enter(&format!("[{}]", idx));

            ctx.enter("duration");
            check_duration(ctx, &stage.duration, "duration", MIN_POSITIVE);
            ctx.exit();

            ctx.enter("target");
            ctx.check(RangeValidator::validate_i64(
                stage.target,
                0,
                MAX_STAGE_TARGET,
                "target",
            ));
            ctx.exit();

            ctx.exit();
        }
        ctx.exit(); // stages
    }

    fn validate_execution(&self, ctx: &mut ValidationContext) {
        let execution = &self.execution;
        ctx.enter("execution");

        if let Some(start) = execution.start_target {
            ctx.enter("startTarget");
            ctx.check(RangeValidator::validate_i64(
                start,
                0,
                MAX_STAGE_TARGET,
                "startTarget",
            ));
            ctx.exit();
        }

        for (field, value) in [
            ("tickInterval", &execution.tick_interval),
            ("progressInterval", &execution.progress_interval),
            ("maxDuration", &execution.max_duration),
        ] {
            if let Some(duration) = value {
                ctx.enter(field);
                check_duration(ctx, duration, field, MIN_POSITIVE);
                ctx.exit();
            }
        }

        // Zero grace periods are allowed: stragglers are aborted on the next tick.
        for (field, value) in [
            ("gracefulRampDown", &execution.graceful_ramp_down),
            ("gracefulStop", &execution.graceful_stop),
        ] {
            if let Some(duration) = value {
                ctx.enter(field);
                check_duration(ctx, duration, field, StdDuration::ZERO);
                ctx.exit();
            }
        }

        ctx.exit(); // execution
    }

    /// Builds the stage plan described by this file.
    pub fn to_run_plan(&self) -> Result<RunPlan, ConfigError> {
        let stages = self
            .stages
            .iter()
            .map(|stage| {
                let target = u32::try_from(stage.target).map_err(|_| {
                    ConfigError::Validation(format!(
                        "stage target {} is out of range",
                        stage.target
                    ))
                })?;
                let mut built = Stage::new(stage.duration.to_std_duration()?, target);
                if let Some(interpolation) = stage.interpolation {
                    built = built.with_interpolation(interpolation);
                }
                Ok(built)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let start_target = match self.execution.start_target {
            Some(start) => u32::try_from(start).map_err(|_| {
                ConfigError::Validation(format!("startTarget {} is out of range", start))
            })?,
            None => ConfigDefaults::start_target(),
        };

        Ok(RunPlan::new(
            stages,
            start_target,
            self.execution
                .interpolation
                .unwrap_or_else(ConfigDefaults::interpolation),
        )?)
    }
}

const MIN_POSITIVE: StdDuration = StdDuration::from_millis(1);

/// Parses `duration` and checks it lies between `min` and the plan ceiling.
fn check_duration(
    ctx: &mut ValidationContext,
    duration: &YamlDuration,
    field: &str,
    min: StdDuration,
) {
    match duration.to_std_duration() {
        Ok(d) => ctx.check(RangeValidator::validate_duration(
            d,
            min,
            MAX_PLAN_DURATION,
            field,
        )),
        Err(e) => ctx.field_error(e.to_string()),
    }
}

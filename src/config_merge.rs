//! Configuration merging and default values.
//!
//! Precedence: Environment Variables > YAML File > Default Values.
//!
//! An environment variable that is set but cannot be parsed is ignored with a
//! warning and the YAML value (or default) applies.

use std::env;
use std::time::Duration;
use tracing::warn;

use crate::plan::Interpolation;
use crate::think_time::ThinkTime;

/// Default configuration values for all optional fields.
#[derive(Debug, Clone)]
pub struct ConfigDefaults;

impl ConfigDefaults {
    pub fn method() -> String {
        "GET".to_string()
    }

    /// Per-request timeout, covering send and body read.
    pub fn request_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn skip_tls_verify() -> bool {
        false
    }

    pub fn think_time() -> ThinkTime {
        ThinkTime::Fixed(Duration::from_secs(1))
    }

    pub fn start_target() -> u32 {
        0
    }

    pub fn interpolation() -> Interpolation {
        Interpolation::Linear
    }

    pub fn tick_interval() -> Duration {
        Duration::from_secs(1)
    }

    pub fn graceful_ramp_down() -> Duration {
        Duration::from_secs(30)
    }

    pub fn graceful_stop() -> Duration {
        Duration::from_secs(30)
    }

    pub fn progress_interval() -> Duration {
        Duration::from_secs(10)
    }

    pub fn pool_max_idle_per_host() -> usize {
        32
    }

    pub fn pool_idle_timeout() -> Duration {
        Duration::from_secs(90)
    }

    pub fn tcp_keepalive() -> Duration {
        Duration::from_secs(60)
    }
}

/// Configuration precedence resolver.
pub struct ConfigMerger;

impl ConfigMerger {
    /// Merge a duration with precedence: env > yaml > default.
    pub fn merge_duration(yaml_value: Option<Duration>, env_var: &str, default: Duration) -> Duration {
        if let Ok(env_val) = env::var(env_var) {
            match crate::utils::parse_duration_string(&env_val) {
                Ok(parsed) => return parsed,
                Err(e) => warn!(var = env_var, value = %env_val, error = %e, "Ignoring invalid duration override"),
            }
        }

        yaml_value.unwrap_or(default)
    }

    /// Merge think time: an env override is always a fixed delay.
    pub fn merge_think_time(yaml_value: Option<ThinkTime>, env_var: &str) -> ThinkTime {
        if let Ok(env_val) = env::var(env_var) {
            match crate::utils::parse_duration_string(&env_val) {
                Ok(parsed) => return ThinkTime::Fixed(parsed),
                Err(e) => warn!(var = env_var, value = %env_val, error = %e, "Ignoring invalid think time override"),
            }
        }

        yaml_value.unwrap_or_else(ConfigDefaults::think_time)
    }

    /// Merge a boolean flag with precedence: env > yaml > default.
    pub fn merge_bool(yaml_value: Option<bool>, env_var: &str, default: bool) -> bool {
        if let Ok(env_val) = env::var(env_var) {
            return env_val.trim().eq_ignore_ascii_case("true");
        }

        yaml_value.unwrap_or(default)
    }

    /// Merge string value with precedence: env > yaml > default.
    pub fn merge_string(yaml_value: Option<String>, env_var: &str, default: String) -> String {
        if let Ok(env_val) = env::var(env_var) {
            if !env_val.is_empty() {
                return env_val;
            }
        }

        yaml_value.unwrap_or(default)
    }

    /// Merge optional string with precedence: env > yaml.
    pub fn merge_optional_string(yaml_value: Option<String>, env_var: &str) -> Option<String> {
        if let Ok(env_val) = env::var(env_var) {
            if !env_val.is_empty() {
                return Some(env_val);
            }
        }

        yaml_value
    }

    /// Merge an optional error-rate fraction with precedence: env > yaml.
    pub fn merge_rate(yaml_value: Option<f64>, env_var: &str) -> Option<f64> {
        if let Ok(env_val) = env::var(env_var) {
            match env_val.trim().parse::<f64>() {
                Ok(parsed) if (0.0..=1.0).contains(&parsed) => return Some(parsed),
                _ => warn!(var = env_var, value = %env_val, "Ignoring error rate override outside 0.0..=1.0"),
            }
        }

        yaml_value
    }

    /// Merge an optional port with precedence: env > yaml.
    pub fn merge_port(yaml_value: Option<u16>, env_var: &str) -> Option<u16> {
        if let Ok(env_val) = env::var(env_var) {
            match env_val.trim().parse::<u16>() {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!(var = env_var, value = %env_val, error = %e, "Ignoring invalid port override"),
            }
        }

        yaml_value
    }
}

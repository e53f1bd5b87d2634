//! Integration tests for YAML run files.

use rampload::config::{Config, ConfigError};
use rampload::plan::Interpolation;
use rampload::think_time::ThinkTime;
use rampload::yaml_config::YamlConfig;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn clean_env() {
    for var in [
        "TARGET_URL",
        "REQUEST_TIMEOUT",
        "THINK_TIME",
        "SKIP_TLS_VERIFY",
        "RESOLVE_TARGET_ADDR",
        "MAX_ERROR_RATE",
        "METRICS_PORT",
    ] {
        env::remove_var(var);
    }
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn bundled_nginx_config() {
    clean_env();
    let config = Config::from_file("configs/nginx-ramp.yaml").unwrap();

    assert_eq!(config.target_url, "http://nginx.default.svc.cluster.local:80/");
    assert_eq!(config.method, "GET");
    assert_eq!(config.think_time, ThinkTime::Fixed(Duration::from_secs(1)));
    assert_eq!(config.plan.total_duration(), Duration::from_secs(40 * 60));
    assert_eq!(config.plan.peak_target(), 100);
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert!(config.max_error_rate.is_none());

    println!("✅ nginx-ramp.yaml loads");
}

#[test]
#[serial]
fn bundled_step_config() {
    clean_env();
    let config = Config::from_file("configs/step-soak.yaml").unwrap();

    assert_eq!(config.plan.interpolation(), Interpolation::Step);
    assert_eq!(config.plan.stages().len(), 4);
    assert_eq!(
        config.plan.stages()[3].interpolation,
        Some(Interpolation::Linear)
    );
    assert_eq!(
        config.think_time,
        ThinkTime::Random {
            min: Duration::from_millis(500),
            max: Duration::from_secs(2),
        }
    );
    assert_eq!(config.execution.graceful_ramp_down, Duration::from_secs(15));
    assert_eq!(config.execution.max_duration, Some(Duration::from_secs(600)));
    assert_eq!(config.max_error_rate, Some(0.01));
    assert_eq!(config.metrics_port, Some(9090));
    assert_eq!(config.pool.max_idle_per_host, 64);
    assert_eq!(config.headers.get("Accept").map(String::as_str), Some("application/json"));

    println!("✅ step-soak.yaml loads");
}

#[test]
#[serial]
fn defaults_applied() {
    clean_env();
    let file = write_config(
        r#"
target:
  url: "http://localhost:8080/"
stages:
  - duration: "30s"
    target: 5
"#,
    );
    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.method, "GET");
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.think_time, ThinkTime::Fixed(Duration::from_secs(1)));
    assert_eq!(config.execution.tick_interval, Duration::from_secs(1));
    assert_eq!(config.execution.graceful_ramp_down, Duration::from_secs(30));
    assert_eq!(config.execution.graceful_stop, Duration::from_secs(30));
    assert_eq!(config.execution.progress_interval, Duration::from_secs(10));
    assert_eq!(config.execution.max_duration, None);
    assert_eq!(config.plan.start_target(), 0);
    assert_eq!(config.plan.interpolation(), Interpolation::Linear);
    assert!(!config.skip_tls_verify);

    println!("✅ defaults fill every optional field");
}

#[test]
fn missing_file_is_read_error() {
    let err = Config::from_file("/nonexistent/run.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::FileRead(_)), "got {:?}", err);

    println!("✅ missing file reported as read error");
}

#[test]
fn malformed_yaml_is_parse_error() {
    let file = write_config("target: [unclosed\n");
    let err = YamlConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::YamlParse(_)), "got {:?}", err);

    println!("✅ malformed YAML reported as parse error");
}

#[test]
fn missing_stages_is_parse_error() {
    let err = YamlConfig::from_str("target:\n  url: \"http://localhost/\"\n").unwrap_err();
    assert!(err.to_string().contains("stages"), "error was: {}", err);
}

#[test]
fn unsupported_version_rejected() {
    let yaml = r#"
version: "9.9"
target:
  url: "http://localhost/"
stages:
  - { duration: "1m", target: 1 }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("version"), "error was: {}", err);
}

#[test]
fn bad_duration_string_rejected() {
    let yaml = r#"
target:
  url: "http://localhost/"
stages:
  - { duration: "5 fortnights", target: 1 }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("stages.[0].duration"), "error was: {}", err);
}

#[test]
fn inverted_random_think_time_rejected() {
    let yaml = r#"
target:
  url: "http://localhost/"
stages:
  - { duration: "1m", target: 1 }
workload:
  thinkTime: { min: "3s", max: "1s" }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("workload.thinkTime"), "error was: {}", err);
}

#[test]
fn half_mtls_pair_rejected() {
    let yaml = r#"
target:
  url: "https://localhost/"
  clientCert: "/etc/certs/client.pem"
stages:
  - { duration: "1m", target: 1 }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("clientKey"), "error was: {}", err);
}

#[test]
fn bad_resolve_override_rejected() {
    let yaml = r#"
target:
  url: "http://localhost/"
  resolve: "localhost-127.0.0.1"
stages:
  - { duration: "1m", target: 1 }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("target.resolve"), "error was: {}", err);
}

#[test]
fn oversized_execution_durations_rejected() {
    let yaml = r#"
target:
  url: "http://localhost/"
  timeout: 18446744073709551615
stages:
  - { duration: "1m", target: 1 }
execution:
  maxDuration: "400d"
  gracefulStop: "18446744073709551615s"
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err().to_string();
    assert!(err.contains("target.timeout"), "error was: {}", err);
    assert!(err.contains("execution.maxDuration"), "error was: {}", err);
    assert!(err.contains("execution.gracefulStop"), "error was: {}", err);

    println!("✅ durations past the plan ceiling are rejected");
}

#[test]
#[serial]
fn request_template_from_config() {
    clean_env();
    let yaml = r#"
target:
  url: "http://localhost:8080/orders"
  method: post
  headers:
    Content-Type: "application/json"
  body: '{"id": 1}'
stages:
  - { duration: "10s", target: 2 }
"#;
    let config = Config::from_yaml_with_env_overrides(&YamlConfig::from_str(yaml).unwrap()).unwrap();
    let template = config.request_template().unwrap();

    assert_eq!(template.method, reqwest::Method::POST);
    assert_eq!(template.url, "http://localhost:8080/orders");
    assert_eq!(template.body.as_deref(), Some("{\"id\": 1}"));
    assert_eq!(
        template.headers.get("content-type").unwrap(),
        "application/json"
    );

    println!("✅ request template carries method, headers and body");
}

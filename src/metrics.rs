use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::env;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "rampload".to_string());

    // === Request Metrics ===

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_total", "Number of failed requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: IntGauge =
        IntGauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Virtual User Metrics ===

    pub static ref VIRTUAL_USERS_ACTIVE: IntGauge =
        IntGauge::with_opts(
            Opts::new("virtual_users_active", "Number of virtual user tasks currently alive")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref VIRTUAL_USERS_TARGET: IntGauge =
        IntGauge::with_opts(
            Opts::new("virtual_users_target", "Concurrency the stage plan currently asks for")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref VIRTUAL_USERS_ABORTED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("virtual_users_aborted_total", "Virtual users hard-stopped after their grace period expired")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref CURRENT_STAGE: IntGauge =
        IntGauge::with_opts(
            Opts::new("current_stage", "Zero-based index of the active stage")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;
    registry.register(Box::new(CONCURRENT_REQUESTS.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;

    registry.register(Box::new(VIRTUAL_USERS_ACTIVE.clone()))?;
    registry.register(Box::new(VIRTUAL_USERS_TARGET.clone()))?;
    registry.register(Box::new(VIRTUAL_USERS_ABORTED_TOTAL.clone()))?;
    registry.register(Box::new(CURRENT_STAGE.clone()))?;

    Ok(())
}

/// Returns a static label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" so the label set stays bounded.
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        100 => "100",
        200 => "200",
        201 => "201",
        202 => "202",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        405 => "405",
        408 => "408",
        409 => "409",
        422 => "422",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

fn encode(registry: &Arc<Mutex<Registry>>) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = match registry.lock() {
        Ok(registry) => registry.gather(),
        Err(poisoned) => poisoned.into_inner().gather(),
    };
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode(&registry) {
        Ok(buffer) => Response::builder()
            .status(200)
            .header("Content-Type", TextEncoder::new().format_type())
            .body(Body::from(buffer)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            Response::builder()
                .status(500)
                .body(Body::from("failed to encode metrics"))
        }
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    match encode(registry).map(String::from_utf8) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            error!(error = %e, "Metrics output was not valid UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            String::from("# ERROR ENCODING METRICS")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_bounded() {
        assert_eq!(status_code_label(200), "200");
        assert_eq!(status_code_label(503), "503");
        assert_eq!(status_code_label(418), "other");
    }

    #[test]
    fn gather_renders_registered_collectors() {
        let registry = Registry::new();
        registry
            .register(Box::new(VIRTUAL_USERS_TARGET.clone()))
            .unwrap();
        VIRTUAL_USERS_TARGET.set(42);

        let text = gather_metrics_string(&Arc::new(Mutex::new(registry)));
        assert!(text.contains("virtual_users_target"), "output was: {}", text);
    }
}

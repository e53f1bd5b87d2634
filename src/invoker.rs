//! Target invocation: one unit of work against the configured endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::debug;

use crate::config::ConfigError;
use crate::errors::RequestError;
use crate::metrics::CONCURRENT_REQUESTS;

/// How a single invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A 2xx response was received and its body fully read
    Success { status: u16 },

    Failure(RequestError),
}

/// Outcome of one invocation, produced by an [`Invoker`] and consumed by the
/// metrics aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    /// Wall-clock time the request was issued
    pub timestamp: SystemTime,

    /// Time from send until the body was drained (or the request failed)
    pub latency: Duration,

    pub outcome: Outcome,
}

impl InvocationResult {
    pub fn success(timestamp: SystemTime, latency: Duration, status: u16) -> Self {
        Self {
            timestamp,
            latency,
            outcome: Outcome::Success { status },
        }
    }

    pub fn failure(timestamp: SystemTime, latency: Duration, error: RequestError) -> Self {
        Self {
            timestamp,
            latency,
            outcome: Outcome::Failure(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }

    /// HTTP status if a response arrived, whether or not it counted as success.
    pub fn status_code(&self) -> Option<u16> {
        match &self.outcome {
            Outcome::Success { status } => Some(*status),
            Outcome::Failure(err) => err.status_code,
        }
    }

    pub fn error(&self) -> Option<&RequestError> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure(err) => Some(err),
        }
    }
}

/// Issues one unit of work and reports how it went.
///
/// Implementations never fail: transport errors, timeouts and bad statuses
/// are returned as [`Outcome::Failure`].
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self) -> InvocationResult;
}

/// The request each iteration sends.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RequestTemplate {
    /// Builds a template, validating the method name and header pairs.
    pub fn new(
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<String>,
    ) -> Result<Self, ConfigError> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| ConfigError::Validation(format!("Invalid HTTP method '{}'", method)))?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_str(name.trim()).map_err(|e| {
                ConfigError::Validation(format!("Invalid header name '{}': {}", name, e))
            })?;
            let header_value = HeaderValue::from_str(value.trim()).map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid header value for '{}': {}",
                    name, e
                ))
            })?;
            header_map.insert(header_name, header_value);
        }

        Ok(Self {
            method,
            url: url.to_string(),
            headers: header_map,
            body,
        })
    }

    /// A bare GET with no headers or body.
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::GET,
            url: url.to_string(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    fn build(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut req = client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        if let Some(ref body) = self.body {
            req = req.body(body.clone());
        }
        req
    }
}

/// Decrements the in-flight gauge even if the request future is dropped.
struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        CONCURRENT_REQUESTS.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        CONCURRENT_REQUESTS.dec();
    }
}

/// HTTP implementation of [`Invoker`] on top of a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    template: RequestTemplate,
    timeout: Duration,
}

impl HttpInvoker {
    pub fn new(client: reqwest::Client, template: RequestTemplate, timeout: Duration) -> Self {
        Self {
            client,
            template,
            timeout,
        }
    }

    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self) -> Outcome {
        match self.template.build(&self.client).send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();

                // Stream and discard the body so connections go back to the pool
                // without buffering whole responses.
                loop {
                    match response.chunk().await {
                        Ok(Some(_chunk)) => {}
                        Ok(None) => break,
                        Err(e) => {
                            return Outcome::Failure(
                                RequestError::from_reqwest(&e).with_status_code(status),
                            )
                        }
                    }
                }

                match RequestError::from_status(status) {
                    Some(err) => Outcome::Failure(err),
                    None => Outcome::Success { status },
                }
            }
            Err(e) => Outcome::Failure(RequestError::from_reqwest(&e)),
        }
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self) -> InvocationResult {
        let _in_flight = InFlightGuard::enter();
        let timestamp = SystemTime::now();
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.send()).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failure(RequestError::timeout(self.timeout)),
        };
        let latency = start.elapsed();

        debug!(
            url = %self.template.url,
            latency_ms = latency.as_millis() as u64,
            outcome = ?outcome,
            "Request completed"
        );

        InvocationResult {
            timestamp,
            latency,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn template_normalizes_method() {
        let template =
            RequestTemplate::new("post", "http://localhost/", &BTreeMap::new(), None).unwrap();
        assert_eq!(template.method, Method::POST);
    }

    #[test]
    fn template_rejects_bad_header() {
        let mut headers = BTreeMap::new();
        headers.insert("Bad Header".to_string(), "x".to_string());
        let err = RequestTemplate::new("GET", "http://localhost/", &headers, None).unwrap_err();
        assert!(err.to_string().contains("Invalid header name"), "error was: {}", err);
    }

    #[test]
    fn template_parses_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        let template = RequestTemplate::new("GET", "http://localhost/", &headers, None).unwrap();
        assert_eq!(template.headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn result_accessors() {
        let now = SystemTime::now();
        let ok = InvocationResult::success(now, Duration::from_millis(3), 200);
        assert!(!ok.is_error());
        assert_eq!(ok.status_code(), Some(200));
        assert!(ok.error().is_none());

        let failed = InvocationResult::failure(
            now,
            Duration::from_millis(3),
            RequestError::from_status(500).unwrap(),
        );
        assert!(failed.is_error());
        assert_eq!(failed.status_code(), Some(500));
        assert_eq!(failed.error().unwrap().category, ErrorCategory::ServerError);
    }
}

//! Request error categorization.
//!
//! Failed invocations are data, not control flow: every failure becomes a
//! [`RequestError`] tagged with an [`ErrorCategory`] and is counted in the run
//! summary instead of unwinding the virtual user that hit it.

use serde::Serialize;
use std::fmt;

/// Categories of errors that can occur while invoking the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// HTTP 4xx responses
    ClientError,

    /// HTTP 5xx responses
    ServerError,

    /// Responses outside 2xx that are neither 4xx nor 5xx (1xx, 3xx)
    UnexpectedStatus,

    /// Network connectivity errors (DNS, connection refused, reset)
    NetworkError,

    /// Request exceeded the per-request timeout
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Anything else
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns `None` for 2xx responses; everything else counts as an error.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            100..=199 | 300..=399 => Some(ErrorCategory::UnexpectedStatus),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }

        let error_msg = format!("{:?}", error).to_lowercase();
        if error_msg.contains("certificate")
            || error_msg.contains("tls")
            || error_msg.contains("ssl")
        {
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if error_msg.contains("dns")
            || error_msg.contains("resolve")
            || error_msg.contains("connect")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::UnexpectedStatus => "unexpected_status",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::UnexpectedStatus => "Unexpected HTTP Status (1xx/3xx)",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    /// Number of categories.
    pub const COUNT: usize = 7;

    /// All categories in a consistent order.
    pub const ALL: [ErrorCategory; Self::COUNT] = [
        ErrorCategory::ClientError,
        ErrorCategory::ServerError,
        ErrorCategory::UnexpectedStatus,
        ErrorCategory::NetworkError,
        ErrorCategory::TimeoutError,
        ErrorCategory::TlsError,
        ErrorCategory::OtherError,
    ];

    /// Position of this category in [`ErrorCategory::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A failed invocation, recorded as a data point.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    pub category: ErrorCategory,

    /// HTTP status code if a response arrived
    pub status_code: Option<u16>,

    pub message: String,
}

impl RequestError {
    /// Builds an error for a non-2xx response, or `None` for success codes.
    pub fn from_status(status_code: u16) -> Option<Self> {
        ErrorCategory::from_status_code(status_code).map(|category| Self {
            category,
            status_code: Some(status_code),
            message: status_reason(status_code).to_string(),
        })
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            status_code: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            category: ErrorCategory::TimeoutError,
            status_code: None,
            message: format!("request timed out after {:?}", after),
        }
    }

    /// Attaches the status of a response that arrived before the failure.
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status_code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status_code {
            write!(
                f,
                "[{}] HTTP {}: {}",
                self.category.label(),
                status,
                self.message
            )
        } else {
            write!(f, "[{}] {}", self.category.label(), self.message)
        }
    }
}

/// Reason phrase for common HTTP status codes.
pub fn status_reason(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",

        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",

        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        429 => "Too Many Requests",

        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",

        _ => "Unknown Status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_success_codes() {
        assert_eq!(ErrorCategory::from_status_code(200), None);
        assert_eq!(ErrorCategory::from_status_code(201), None);
        assert_eq!(ErrorCategory::from_status_code(204), None);
    }

    #[test]
    fn redirects_are_unexpected() {
        assert_eq!(
            ErrorCategory::from_status_code(301),
            Some(ErrorCategory::UnexpectedStatus)
        );
        assert_eq!(
            ErrorCategory::from_status_code(304),
            Some(ErrorCategory::UnexpectedStatus)
        );
    }

    #[test]
    fn categorize_4xx_errors() {
        assert_eq!(
            ErrorCategory::from_status_code(404),
            Some(ErrorCategory::ClientError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(429),
            Some(ErrorCategory::ClientError)
        );
    }

    #[test]
    fn categorize_5xx_errors() {
        assert_eq!(
            ErrorCategory::from_status_code(500),
            Some(ErrorCategory::ServerError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(503),
            Some(ErrorCategory::ServerError)
        );
    }

    #[test]
    fn out_of_range_status_is_other() {
        assert_eq!(
            ErrorCategory::from_status_code(999),
            Some(ErrorCategory::OtherError)
        );
    }

    #[test]
    fn index_matches_all_order() {
        for (i, category) in ErrorCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn request_error_from_status() {
        let err = RequestError::from_status(503).unwrap();
        assert_eq!(err.category, ErrorCategory::ServerError);
        assert_eq!(err.status_code, Some(503));
        assert_eq!(err.message, "Service Unavailable");
        assert!(RequestError::from_status(200).is_none());
    }

    #[test]
    fn request_error_display() {
        let err = RequestError::new(ErrorCategory::NetworkError, "connection refused");
        let display = err.to_string();
        assert!(display.contains("network_error"));
        assert!(display.contains("connection refused"));

        let err = RequestError::from_status(404).unwrap();
        assert_eq!(err.to_string(), "[client_error] HTTP 404: Not Found");
    }

    #[test]
    fn timeout_error() {
        let err = RequestError::timeout(std::time::Duration::from_secs(2));
        assert_eq!(err.category, ErrorCategory::TimeoutError);
        assert!(err.status_code.is_none());
    }
}

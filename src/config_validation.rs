//! Field-level validation for run files.
//!
//! Validators return a [`ValidationError`]; [`ValidationContext`] collects
//! every failure with its dotted field path so one pass reports everything
//! wrong with a file instead of stopping at the first problem.

use std::time::Duration;
use thiserror::Error;

use crate::utils::format_duration;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}': invalid enum value '{value}'. Expected one of: {expected}")]
    InvalidEnum {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation context for building error messages.
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self {
            field_path: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Enter a nested field context.
    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    /// Exit the current field context.
    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    /// Get the current field path as a string.
    pub fn current_path(&self) -> String {
        self.field_path.join(".")
    }

    /// Add a field error with automatic path.
    pub fn field_error(&mut self, message: String) {
        self.errors.push(ValidationError::FieldError {
            field: self.current_path(),
            message,
        });
    }

    /// Records the outcome of a validator under the current path.
    pub fn check(&mut self, result: ValidationResult<()>) {
        if let Err(e) = result {
            self.field_error(e.to_string());
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume the context and return a result.
    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors[0].clone()),
            _ => {
                let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
                Err(ValidationError::Multiple(messages.join("; ")))
            }
        }
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Validator for URLs.
pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str) -> ValidationResult<()> {
        if url.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: format!("URL must start with http:// or https://, got: {}", url),
            });
        }

        if url.contains(' ') {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot contain spaces".to_string(),
            });
        }

        Ok(())
    }
}

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_i64(value: i64, min: i64, max: i64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_f64(value: f64, min: f64, max: f64, field: &str) -> ValidationResult<()> {
        if value.is_nan() || value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    /// Checks `min <= value <= max`.
    pub fn validate_duration(
        value: Duration,
        min: Duration,
        max: Duration,
        field: &str,
    ) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: format_duration(value),
                min: format_duration(min),
                max: format_duration(max),
            });
        }
        Ok(())
    }
}

/// Validator for HTTP methods.
pub struct HttpMethodValidator;

impl HttpMethodValidator {
    const VALID_METHODS: &'static [&'static str] =
        &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

    pub fn validate(method: &str) -> ValidationResult<()> {
        let method_upper = method.trim().to_uppercase();
        if !Self::VALID_METHODS.contains(&method_upper.as_str()) {
            return Err(ValidationError::InvalidEnum {
                field: "method".to_string(),
                value: method.to_string(),
                expected: Self::VALID_METHODS.join(", "),
            });
        }
        Ok(())
    }
}

/// Validator for the run file format version.
pub struct VersionValidator;

impl VersionValidator {
    pub const SUPPORTED: &'static [&'static str] = &["1.0"];

    pub fn validate(version: &str) -> ValidationResult<()> {
        if !Self::SUPPORTED.contains(&version.trim()) {
            return Err(ValidationError::InvalidEnum {
                field: "version".to_string(),
                value: version.to_string(),
                expected: Self::SUPPORTED.join(", "),
            });
        }
        Ok(())
    }
}

/// Validator for the mTLS certificate/key pair.
pub struct TlsPairValidator;

impl TlsPairValidator {
    pub fn validate(cert: Option<&str>, key: Option<&str>) -> ValidationResult<()> {
        match (cert, key) {
            (Some(_), None) => Err(ValidationError::FieldError {
                field: "clientKey".to_string(),
                message: "clientCert is set but clientKey is missing".to_string(),
            }),
            (None, Some(_)) => Err(ValidationError::FieldError {
                field: "clientCert".to_string(),
                message: "clientKey is set but clientCert is missing".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation() {
        assert!(UrlValidator::validate("http://nginx.default.svc.cluster.local:80/").is_ok());
        assert!(UrlValidator::validate("https://example.com").is_ok());
        assert!(UrlValidator::validate("").is_err());
        assert!(UrlValidator::validate("ftp://example.com").is_err());
        assert!(UrlValidator::validate("http://exa mple.com").is_err());
    }

    #[test]
    fn range_validation() {
        assert!(RangeValidator::validate_i64(5, 0, 10, "target").is_ok());
        assert!(RangeValidator::validate_i64(-1, 0, 10, "target").is_err());
        assert!(RangeValidator::validate_f64(0.5, 0.0, 1.0, "rate").is_ok());
        assert!(RangeValidator::validate_f64(1.5, 0.0, 1.0, "rate").is_err());
        assert!(RangeValidator::validate_f64(f64::NAN, 0.0, 1.0, "rate").is_err());
        let (min, max) = (Duration::from_millis(1), Duration::from_secs(60));
        assert!(RangeValidator::validate_duration(Duration::ZERO, min, max, "d").is_err());
        assert!(RangeValidator::validate_duration(min, min, max, "d").is_ok());
        assert!(RangeValidator::validate_duration(max, min, max, "d").is_ok());
        let err = RangeValidator::validate_duration(Duration::from_secs(61), min, max, "d")
            .unwrap_err();
        assert!(err.to_string().contains("1m1s"), "error was: {}", err);
    }

    #[test]
    fn method_validation_is_case_insensitive() {
        assert!(HttpMethodValidator::validate("get").is_ok());
        assert!(HttpMethodValidator::validate("DELETE").is_ok());
        let err = HttpMethodValidator::validate("TRACE").unwrap_err();
        assert!(err.to_string().contains("Expected one of"), "error was: {}", err);
    }

    #[test]
    fn version_validation() {
        assert!(VersionValidator::validate("1.0").is_ok());
        assert!(VersionValidator::validate("2.0").is_err());
    }

    #[test]
    fn tls_pair_must_be_complete() {
        assert!(TlsPairValidator::validate(None, None).is_ok());
        assert!(TlsPairValidator::validate(Some("c.pem"), Some("k.pem")).is_ok());
        assert!(TlsPairValidator::validate(Some("c.pem"), None).is_err());
        assert!(TlsPairValidator::validate(None, Some("k.pem")).is_err());
    }

    #[test]
    fn context_tracks_paths() {
        let mut ctx = ValidationContext::new();
        ctx.enter("stages");
        ctx.enter("[1]");
        ctx.enter("duration");
        assert_eq!(ctx.current_path(), "stages.[1].duration");
        ctx.field_error("must be greater than zero".to_string());
        ctx.exit();
        ctx.exit();
        ctx.exit();

        assert!(ctx.has_errors());
        let err = ctx.into_result().unwrap_err();
        assert!(err.to_string().contains("stages.[1].duration"), "error was: {}", err);
    }

    #[test]
    fn context_joins_multiple_errors() {
        let mut ctx = ValidationContext::new();
        ctx.enter("a");
        ctx.field_error("first".to_string());
        ctx.exit();
        ctx.enter("b");
        ctx.check(Err(ValidationError::FieldError {
            field: "b".to_string(),
            message: "second".to_string(),
        }));
        ctx.exit();

        assert_eq!(ctx.errors().len(), 2);
        match ctx.into_result().unwrap_err() {
            ValidationError::Multiple(msg) => {
                assert!(msg.contains("first") && msg.contains("second"), "msg: {}", msg);
            }
            other => panic!("expected Multiple, got {:?}", other),
        }
    }

    #[test]
    fn empty_context_is_ok() {
        assert!(ValidationContext::new().into_result().is_ok());
    }
}

//! # Error Handling Module
//!
//! Every failure the gateway can produce is a variant of [`GatewayError`].
//! The enum is `Clone` because a single upstream failure is broadcast to every
//! caller that joined the same in-flight fetch.
//!
//! Each variant maps to an HTTP status and a JSON body through the
//! [`IntoResponse`] implementation at the bottom of this file, so handlers can
//! simply return `Result<_, GatewayError>`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Diagnostic summary of the error that caused a failure.
///
/// Only the displayable parts are kept so the owning error stays `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCause {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorCause {
    /// Summarize the innermost source of `err`, if it has one.
    pub fn from_source(err: &(dyn std::error::Error + 'static)) -> Option<Self> {
        let mut source = err.source()?;
        while let Some(next) = source.source() {
            source = next;
        }

        let code = source
            .downcast_ref::<std::io::Error>()
            .map(|io| format!("{:?}", io.kind()));

        Some(Self {
            message: source.to_string(),
            code,
        })
    }
}

/// Error taxonomy of the gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// The request is missing something the client must provide
    #[error("Invalid request: {field} - {reason}")]
    ClientInput { field: String, reason: String },

    /// The deployment lacks a required server-side setting (e.g. the upstream credential)
    #[error("Server misconfiguration: {message}")]
    ServerConfig { message: String },

    /// Too many upstream-bound requests from one client in the current window
    #[error("Rate limit exceeded: {limit} requests per {window}")]
    RateLimitExceeded {
        limit: u32,
        window: String,
        retry_after_secs: u64,
    },

    /// Upstream answered with a non-2xx status
    #[error("Upstream API error: {status} {}", status_text.as_deref().unwrap_or(""))]
    Upstream {
        status: u16,
        status_text: Option<String>,
        body: Option<serde_json::Value>,
    },

    /// Upstream did not answer within the bound
    #[error("Upstream request timed out after {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// Network-level failure talking to the upstream
    #[error("HTTP client error: {message}")]
    HttpClient {
        message: String,
        cause: Option<ErrorCause>,
    },

    /// Configuration loading or validation failed
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Anything else
    #[error("Internal server error: {message}")]
    Internal {
        message: String,
        code: Option<String>,
        cause: Option<ErrorCause>,
    },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("JSON error: {message}")]
    Json { message: String },

    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a server misconfiguration error (surfaced per request as 500)
    pub fn server_config<S: Into<String>>(message: S) -> Self {
        Self::ServerConfig {
            message: message.into(),
        }
    }

    /// Create a client input error for a missing or invalid field
    pub fn client_input<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::ClientInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            code: None,
            cause: None,
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientInput { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            Self::UpstreamTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::HttpClient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServerConfig { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Json { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this failure came from talking to the upstream.
    ///
    /// Only these failures are eligible for the stale-if-error fallback.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::UpstreamTimeout { .. } | Self::HttpClient { .. }
        )
    }

    /// Check if a caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } => true,
            Self::UpstreamTimeout { .. } => true,
            Self::HttpClient { .. } => true,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get a string representation of the error type for logs and API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ClientInput { .. } => "client_input_error",
            Self::ServerConfig { .. } => "server_config_error",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Upstream { .. } => "upstream_error",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::HttpClient { .. } => "http_client_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }

    fn body(&self) -> serde_json::Value {
        let status = self.status_code().as_u16();
        match self {
            Self::ClientInput { reason, .. } => json!({ "error": reason }),
            Self::ServerConfig { message } => json!({ "error": message }),
            Self::RateLimitExceeded {
                retry_after_secs, ..
            } => json!({
                "error": "Too many requests",
                "retryAfter": retry_after_secs,
            }),
            Self::Upstream {
                status_text, body, ..
            } => json!({
                "error": "Upstream request failed",
                "status": status,
                "statusText": status_text,
                "body": body,
            }),
            Self::UpstreamTimeout { .. } => json!({
                "error": "Upstream request failed",
                "status": status,
                "message": self.to_string(),
            }),
            Self::HttpClient { cause, .. } => json!({
                "error": "Upstream request failed",
                "status": status,
                "message": self.to_string(),
                "cause": cause,
            }),
            Self::Internal {
                message,
                code,
                cause,
            } => json!({
                "error": "Internal server error",
                "message": message,
                "code": code,
                "cause": cause,
            }),
            _ => json!({
                "error": "Internal server error",
                "message": self.to_string(),
                "code": self.error_type(),
                "cause": null,
            }),
        }
    }
}

impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let cause = ErrorCause::from_source(&err);
        Self::HttpClient {
            // reqwest embeds the full URL in its message, which carries the api key
            message: err.without_url().to_string(),
            cause,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.body())).into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        if let Self::RateLimitExceeded {
            retry_after_secs, ..
        } = &self
        {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::client_input("endpoint", "Missing endpoint").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::server_config("no key").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::RateLimitExceeded {
                limit: 1,
                window: "1m".to_string(),
                retry_after_secs: 30,
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::UpstreamTimeout { timeout_ms: 20_000 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let not_found = GatewayError::Upstream {
            status: 404,
            status_text: Some("Not Found".to_string()),
            body: None,
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        // A non-error status cannot be surfaced as a failure
        let odd = GatewayError::Upstream {
            status: 304,
            status_text: None,
            body: None,
        };
        assert_eq!(odd.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_upstream_failure_classification() {
        assert!(GatewayError::UpstreamTimeout { timeout_ms: 1 }.is_upstream_failure());
        assert!(GatewayError::HttpClient {
            message: "connection refused".to_string(),
            cause: None,
        }
        .is_upstream_failure());
        assert!(!GatewayError::internal("boom").is_upstream_failure());
        assert!(!GatewayError::client_input("endpoint", "Missing endpoint").is_upstream_failure());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::UpstreamTimeout { timeout_ms: 1 }.is_retryable());
        assert!(GatewayError::Upstream {
            status: 503,
            status_text: None,
            body: None,
        }
        .is_retryable());
        assert!(!GatewayError::Upstream {
            status: 404,
            status_text: None,
            body: None,
        }
        .is_retryable());
        assert!(!GatewayError::server_config("no key").is_retryable());
    }

    #[derive(Debug)]
    struct ConnectFailed(std::io::Error);

    impl std::fmt::Display for ConnectFailed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("connect failed")
        }
    }

    impl std::error::Error for ConnectFailed {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_cause_keeps_innermost_source() {
        let err = ConnectFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let cause = ErrorCause::from_source(&err).unwrap();
        assert_eq!(cause.message, "refused");
        assert_eq!(cause.code.as_deref(), Some("ConnectionRefused"));
        assert_eq!(
            serde_json::to_value(&cause).unwrap(),
            json!({"message": "refused", "code": "ConnectionRefused"})
        );

        let leaf = std::io::Error::new(std::io::ErrorKind::Other, "leaf");
        assert!(ErrorCause::from_source(&leaf).is_none());
    }

    #[test]
    fn test_rate_limit_response_headers() {
        let response = GatewayError::RateLimitExceeded {
            limit: 1,
            window: "1m".to_string(),
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["cache-control"], "no-store");
    }

    #[test]
    fn test_error_bodies_carry_error_field() {
        let internal = GatewayError::Internal {
            message: "boom".to_string(),
            code: Some("E_BOOM".to_string()),
            cause: Some(ErrorCause {
                message: "inner".to_string(),
                code: None,
            }),
        };
        let body = internal.body();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["code"], "E_BOOM");
        assert_eq!(body["cause"]["message"], "inner");

        let upstream = GatewayError::Upstream {
            status: 502,
            status_text: Some("Bad Gateway".to_string()),
            body: Some(json!({"status_message": "down"})),
        };
        let body = upstream.body();
        assert_eq!(body["status"], 502);
        assert_eq!(body["statusText"], "Bad Gateway");
        assert_eq!(body["body"]["status_message"], "down");
    }
}

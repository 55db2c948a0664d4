// Error handling module
// Defines the error taxonomy and the classification helpers callers branch on

use serde_json::Value;
use thiserror::Error;

/// Transport-level failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Other,
}

impl NetworkErrorKind {
    /// Categorize a reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkErrorKind::Timeout
        } else if e.is_connect() {
            NetworkErrorKind::Connect
        } else if e.is_request() {
            NetworkErrorKind::Request
        } else if e.is_body() {
            NetworkErrorKind::Body
        } else if e.is_decode() {
            NetworkErrorKind::Decode
        } else {
            NetworkErrorKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::Connect => "connection_failed",
            NetworkErrorKind::Request => "request_error",
            NetworkErrorKind::Body => "body_error",
            NetworkErrorKind::Decode => "decode_error",
            NetworkErrorKind::Other => "unknown",
        }
    }
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the session and transport layers
///
/// `Clone` so that one single-flight token exchange can hand the same
/// outcome to every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum BsnError {
    /// Credential or token failure
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport failure (connection refused, timeout, DNS)
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Invalid local setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid caller-supplied argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error reported by the remote API
    #[error("API error: {status} {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        details: Option<Value>,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl BsnError {
    /// Build a network error from a reqwest failure
    pub fn network(e: &reqwest::Error) -> Self {
        BsnError::Network {
            kind: NetworkErrorKind::from_reqwest(e),
            message: e.to_string(),
        }
    }

    /// Build an API error without details
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        BsnError::Api {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Remote status code, if this error carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            BsnError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether an automatic retry may fix this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            BsnError::Api { status, .. } => is_retryable_status(*status),
            BsnError::Network { .. } => true,
            BsnError::Authentication(_)
            | BsnError::Configuration(_)
            | BsnError::Validation(_)
            | BsnError::Cancelled => false,
        }
    }

    /// Build an API error from a non-success response body
    ///
    /// Understands `{error:{code,message,details}}`, `{code,message}` and the
    /// OAuth `{error, error_description}` shape; anything else becomes the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let fallback_code = default_code(status);

        let Ok(json) = serde_json::from_str::<Value>(body) else {
            let message = if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            };
            return BsnError::api(status, fallback_code, message);
        };

        let (code, message, details) = match json.get("error") {
            Some(Value::Object(obj)) => (
                string_field(obj.get("code")).or_else(|| string_field(obj.get("name"))),
                string_field(obj.get("message")),
                obj.get("details").cloned(),
            ),
            Some(Value::String(code)) => (
                Some(code.clone()),
                string_field(json.get("error_description")),
                None,
            ),
            _ => (
                string_field(json.get("code")),
                string_field(json.get("message")),
                json.get("details").cloned(),
            ),
        };

        BsnError::Api {
            status,
            code: code.unwrap_or_else(|| fallback_code.to_string()),
            message: message.unwrap_or_else(|| format!("HTTP {}", status)),
            details: details.filter(|d| !d.is_null()).or(Some(json)),
        }
    }
}

fn string_field(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn default_code(status: u16) -> &'static str {
    match status {
        400 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        429 => "rate_limited",
        500..=599 => "server_error",
        _ => "http_error",
    }
}

/// Retryable iff status >= 500 or status == 429
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

pub fn is_authentication_error(err: &BsnError) -> bool {
    matches!(err, BsnError::Authentication(_))
}

pub fn is_configuration_error(err: &BsnError) -> bool {
    matches!(err, BsnError::Configuration(_))
}

pub fn is_network_error(err: &BsnError) -> bool {
    matches!(err, BsnError::Network { .. })
}

pub fn is_validation_error(err: &BsnError) -> bool {
    matches!(err, BsnError::Validation(_))
}

pub fn is_api_error(err: &BsnError) -> bool {
    matches!(err, BsnError::Api { .. })
}

pub fn is_retryable_error(err: &BsnError) -> bool {
    err.is_retryable()
}

pub fn is_cancelled(err: &BsnError) -> bool {
    matches!(err, BsnError::Cancelled)
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, BsnError>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_error_messages() {
        let err = BsnError::Authentication("Invalid client".to_string());
        assert_eq!(err.to_string(), "Authentication failed: Invalid client");

        let err = BsnError::api(429, "rate_limited", "Slow down");
        assert_eq!(err.to_string(), "API error: 429 rate_limited - Slow down");

        let err = BsnError::Network {
            kind: NetworkErrorKind::Timeout,
            message: "operation timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Network error (timeout): operation timed out");
    }

    #[test]
    fn test_config_error_message() {
        let err = BsnError::Configuration("Missing client id".to_string());
        assert_eq!(err.to_string(), "Configuration error: Missing client id");
        assert!(is_configuration_error(&err));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_error_message() {
        let err = BsnError::Validation("device id must be positive".to_string());
        assert_eq!(err.to_string(), "Validation error: device id must be positive");
        assert!(is_validation_error(&err));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_error(&BsnError::api(500, "server_error", "boom")));
        assert!(is_retryable_error(&BsnError::api(429, "rate_limited", "slow")));
        assert!(!is_retryable_error(&BsnError::api(400, "bad_request", "bad")));
        assert!(!is_retryable_error(&BsnError::api(404, "not_found", "gone")));
    }

    #[test]
    fn test_classification_helpers() {
        let network = BsnError::Network {
            kind: NetworkErrorKind::Connect,
            message: "refused".to_string(),
        };
        assert!(is_network_error(&network));
        assert!(is_retryable_error(&network));

        let auth = BsnError::Authentication("bad secret".to_string());
        assert!(is_authentication_error(&auth));
        assert!(!is_retryable_error(&auth));

        assert!(is_cancelled(&BsnError::Cancelled));
        assert!(!is_retryable_error(&BsnError::Cancelled));
        assert!(is_api_error(&BsnError::api(403, "forbidden", "no")));
    }

    #[test]
    fn test_from_response_nested_error() {
        let body = json!({
            "error": {"code": "DeviceNotFound", "message": "No such device", "details": {"id": 7}}
        })
        .to_string();

        match BsnError::from_response(404, &body) {
            BsnError::Api { status, code, message, details } => {
                assert_eq!(status, 404);
                assert_eq!(code, "DeviceNotFound");
                assert_eq!(message, "No such device");
                assert_eq!(details, Some(json!({"id": 7})));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_response_oauth_shape() {
        let body = r#"{"error":"invalid_client","error_description":"Invalid client credentials"}"#;
        match BsnError::from_response(401, body) {
            BsnError::Api { code, message, .. } => {
                assert_eq!(code, "invalid_client");
                assert_eq!(message, "Invalid client credentials");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_response_plain_text() {
        let err = BsnError::from_response(502, "Bad Gateway");
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("server_error"));
        assert!(err.to_string().contains("Bad Gateway"));

        let err = BsnError::from_response(503, "");
        assert!(err.to_string().contains("HTTP 503"));
    }

    proptest! {
        #[test]
        fn prop_api_retryable_iff_5xx_or_429(status in 100u16..600) {
            let err = BsnError::api(status, "x", "y");
            prop_assert_eq!(err.is_retryable(), status >= 500 || status == 429);
        }
    }
}

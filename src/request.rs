// Request specifications and response envelope handling

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BsnError, Result};

/// How a successful response body maps onto the caller's target type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unwrap {
    /// The body is the payload (object, array, or empty)
    #[default]
    Direct,
    /// The body is `{error, result}`; a non-null `error` is an API error
    Envelope,
}

/// Description of one logical HTTP request
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) unwrap: Unwrap,
    pub(crate) idempotent: bool,
    pub(crate) requires_network: bool,
}

impl RequestSpec {
    /// `path` is either relative to the API base URL or an absolute http(s) URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let idempotent = matches!(
            method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
        );
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            unwrap: Unwrap::Direct,
            idempotent,
            requires_network: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON request body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| BsnError::Validation(format!("request body is not serializable: {}", e)))?;
        self.body = Some(bytes);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn unwrap_with(mut self, unwrap: Unwrap) -> Self {
        self.unwrap = unwrap;
        self
    }

    /// Override the method-derived idempotency flag
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Endpoint works without a bound network (e.g. principal-level lookups)
    pub fn without_network(mut self) -> Self {
        self.requires_network = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn requires_network(&self) -> bool {
        self.requires_network
    }

    pub fn unwrap_strategy(&self) -> Unwrap {
        self.unwrap
    }
}

/// Decode a successful response body according to `unwrap`
pub fn decode_body<T: DeserializeOwned>(status: u16, body: &[u8], unwrap: Unwrap) -> Result<T> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| invalid_response(status, e))?
    };

    let payload = match unwrap {
        Unwrap::Direct => value,
        Unwrap::Envelope => open_envelope(status, value)?,
    };

    serde_json::from_value(payload).map_err(|e| invalid_response(status, e))
}

fn open_envelope(status: u16, value: Value) -> Result<Value> {
    let Value::Object(mut obj) = value else {
        return Err(BsnError::api(
            status,
            "invalid_response",
            "expected an {error, result} envelope",
        ));
    };

    match obj.remove("error") {
        None | Some(Value::Null) => Ok(obj.remove("result").unwrap_or(Value::Null)),
        Some(error) => Err(envelope_error(status, error)),
    }
}

fn envelope_error(status: u16, error: Value) -> BsnError {
    match &error {
        Value::Object(fields) => {
            let status = fields
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(status);
            let code = fields
                .get("code")
                .or_else(|| fields.get("name"))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "remote_error".to_string());
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("remote operation failed")
                .to_string();
            BsnError::Api {
                status,
                code,
                message,
                details: Some(error),
            }
        }
        Value::String(message) => BsnError::api(status, "remote_error", message.clone()),
        other => BsnError::Api {
            status,
            code: "remote_error".to_string(),
            message: other.to_string(),
            details: Some(other.clone()),
        },
    }
}

fn invalid_response(status: u16, e: serde_json::Error) -> BsnError {
    BsnError::api(
        status,
        "invalid_response",
        format!("failed to decode response body: {}", e),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Device {
        id: u64,
        serial: String,
    }

    #[test]
    fn test_method_idempotency_defaults() {
        assert!(RequestSpec::get("Devices").is_idempotent());
        assert!(RequestSpec::put("Devices/1").is_idempotent());
        assert!(RequestSpec::delete("Devices/1").is_idempotent());
        assert!(!RequestSpec::post("Devices").is_idempotent());
        assert!(RequestSpec::post("Devices").idempotent(true).is_idempotent());
    }

    #[test]
    fn test_json_body() {
        let spec = RequestSpec::post("Groups")
            .json(&serde_json::json!({"name": "Lobby"}))
            .unwrap();
        assert_eq!(spec.body.as_deref(), Some(br#"{"name":"Lobby"}"#.as_slice()));
    }

    #[test]
    fn test_direct_object() {
        let device: Device =
            decode_body(200, br#"{"id": 7, "serial": "XD1234"}"#, Unwrap::Direct).unwrap();
        assert_eq!(device, Device { id: 7, serial: "XD1234".to_string() });
    }

    #[test]
    fn test_direct_array() {
        let devices: Vec<Device> = decode_body(
            200,
            br#"[{"id": 1, "serial": "A"}, {"id": 2, "serial": "B"}]"#,
            Unwrap::Direct,
        )
        .unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn test_empty_body_decodes_as_unit() {
        decode_body::<()>(204, b"", Unwrap::Direct).unwrap();
        let none: Option<Device> = decode_body(200, b"  \n", Unwrap::Direct).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_envelope_result() {
        let device: Device = decode_body(
            200,
            br#"{"error": null, "result": {"id": 3, "serial": "C"}}"#,
            Unwrap::Envelope,
        )
        .unwrap();
        assert_eq!(device.id, 3);

        let value: serde_json::Value =
            decode_body(200, br#"{"result": {"ok": true}}"#, Unwrap::Envelope).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_envelope_error_object() {
        let err = decode_body::<Device>(
            200,
            br#"{"error": {"code": "PlayerOffline", "message": "player unreachable"}, "result": null}"#,
            Unwrap::Envelope,
        )
        .unwrap_err();

        match err {
            BsnError::Api { status, code, message, details } => {
                assert_eq!(status, 200);
                assert_eq!(code, "PlayerOffline");
                assert_eq!(message, "player unreachable");
                assert!(details.is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_error_string() {
        let err =
            decode_body::<Device>(200, br#"{"error": "timeout waiting for player"}"#, Unwrap::Envelope)
                .unwrap_err();
        assert!(err.to_string().contains("timeout waiting for player"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_envelope_error_carries_status() {
        let err = decode_body::<Device>(
            200,
            br#"{"error": {"status": 503, "message": "busy"}}"#,
            Unwrap::Envelope,
        )
        .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_envelope_rejects_non_object() {
        let err = decode_body::<Device>(200, b"[1,2,3]", Unwrap::Envelope).unwrap_err();
        assert!(matches!(err, BsnError::Api { ref code, .. } if code == "invalid_response"));
    }

    #[test]
    fn test_malformed_body() {
        let err = decode_body::<Device>(200, b"{not json", Unwrap::Direct).unwrap_err();
        assert!(matches!(err, BsnError::Api { ref code, .. } if code == "invalid_response"));
        assert!(!err.is_retryable());
    }
}

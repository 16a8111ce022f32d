//! Request/response value types and the outbound error taxonomy.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// An owned outbound request. Owning the method, path, headers, and body bytes
/// lets the client rebuild a byte-identical request for every retry attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attaches a JSON body and matching content type.
    pub fn json(mut self, value: &Value) -> Self {
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        self.body = Some(value.to_string().into_bytes());
        self
    }
}

/// A fully-read response. Non-success statuses are ordinary values here; the
/// caller decides how to treat them.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Structured error body returned by the platform on failed requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Parses the body if it is well-formed JSON; malformed bodies yield
    /// `None` and the caller proceeds with status-derived detail alone.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

/// Failures of the call itself. Server-reported statuses (including a 429
/// that survived all retry attempts) are returned as [`ApiResponse`] values,
/// not errors, so callers can always distinguish "the server said no" from
/// "the call never completed".
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unit_json_request_carries_content_type_and_body_bytes() {
        let request = ApiRequest::post("/channels/1/messages").json(&json!({"content": "hi"}));
        assert!(request
            .headers
            .iter()
            .any(|(name, value)| name == "content-type" && value == "application/json"));
        let body = request.body.expect("body set");
        let parsed: Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(parsed["content"], "hi");
    }

    #[test]
    fn unit_cloned_request_duplicates_method_path_and_body() {
        let request = ApiRequest::post("/channels/1/messages")
            .header("authorization", "Bot token")
            .json(&json!({"content": "hi"}));
        let cloned = request.clone();
        assert_eq!(cloned.method, request.method);
        assert_eq!(cloned.path, request.path);
        assert_eq!(cloned.headers, request.headers);
        assert_eq!(cloned.body, request.body);
    }

    #[test]
    fn unit_error_body_parse_swallows_malformed_payloads() {
        assert!(ApiErrorBody::parse(b"not json").is_none());
        let parsed = ApiErrorBody::parse(br#"{"code": 50013, "message": "Missing Permissions"}"#)
            .expect("well-formed body");
        assert_eq!(parsed.code, Some(50_013));
        assert_eq!(parsed.message.as_deref(), Some("Missing Permissions"));
    }
}

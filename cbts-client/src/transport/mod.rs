//! HTTP transport abstraction
//!
//! The session layer talks to the backend only through [`ApiTransport`]. A
//! transport reports HTTP statuses as data; only connection-level failures are
//! errors, so that the session manager can decide what a 401 means.

use async_trait::async_trait;
use cbts_core::{CbtsError, CbtsResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod http;

pub use http::ReqwestTransport;
pub use reqwest::Method;

/// A request against a path relative to the API base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Bearer token attached by the session layer
    pub bearer: Option<String>,
    /// Set on the replay after a refresh; a retry never triggers another refresh
    pub is_retry: bool,
}

impl ApiRequest {
    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
            is_retry: false,
        }
    }

    pub fn get<P: Into<String>>(path: P) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post<P: Into<String>>(path: P, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put<P: Into<String>>(path: P, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch<P: Into<String>>(path: P, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete<P: Into<String>>(path: P) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn into_retry(mut self) -> Self {
        self.is_retry = true;
        self
    }
}

/// Status and decoded body of a backend response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// JSON body; `Null` for empty bodies, a JSON string for non-JSON bodies
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Human-readable message from a DRF-style error body
    pub fn detail(&self) -> Option<String> {
        match &self.body {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Object(map) => {
                if let Some(Value::String(detail)) = map.get("detail") {
                    return Some(detail.clone());
                }
                map.iter().find_map(|(field, value)| match value {
                    Value::Array(items) => items
                        .first()
                        .and_then(Value::as_str)
                        .map(|msg| format!("{}: {}", field, msg)),
                    Value::String(msg) => Some(format!("{}: {}", field, msg)),
                    _ => None,
                })
            }
            _ => None,
        }
    }

    /// Map non-success statuses to errors
    ///
    /// A 401 reaching this point has already been through the refresh path.
    pub fn into_result(self, operation: &str) -> CbtsResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = self
            .detail()
            .unwrap_or_else(|| format!("{} failed with status {}", operation, self.status));
        if self.is_unauthorized() {
            return Err(CbtsError::session_expired(message, "transport"));
        }
        Err(CbtsError::api(self.status, message, "transport"))
    }

    pub fn json<T: DeserializeOwned>(self) -> CbtsResult<T> {
        Ok(serde_json::from_value(self.body)?)
    }
}

/// Trait for backend transports
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Send one request; HTTP error statuses are returned, not raised
    async fn send(&self, request: &ApiRequest) -> CbtsResult<ApiResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detail_prefers_detail_field() {
        let response = ApiResponse::new(401, json!({"detail": "Token is invalid or expired"}));
        assert_eq!(response.detail().as_deref(), Some("Token is invalid or expired"));
    }

    #[test]
    fn test_detail_falls_back_to_field_errors() {
        let response = ApiResponse::new(400, json!({"password2": ["Passwords do not match."]}));
        assert_eq!(
            response.detail().as_deref(),
            Some("password2: Passwords do not match.")
        );
        assert_eq!(ApiResponse::new(500, Value::Null).detail(), None);
    }

    #[test]
    fn test_into_result_maps_statuses() {
        assert!(ApiResponse::new(204, Value::Null).into_result("delete").is_ok());

        match ApiResponse::new(401, Value::Null).into_result("list_bugs") {
            Err(CbtsError::SessionExpired { .. }) => {}
            other => panic!("Expected SessionExpired, got {:?}", other),
        }

        match ApiResponse::new(403, json!({"detail": "Forbidden"})).into_result("list_bugs") {
            Err(CbtsError::Api {
                status, message, ..
            }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "Forbidden");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_retry_flag_survives_builder() {
        let request = ApiRequest::get("bugs/").with_bearer("abc").into_retry();
        assert!(request.is_retry);
        assert_eq!(request.bearer.as_deref(), Some("abc"));
        assert_eq!(request.method, Method::GET);
    }
}

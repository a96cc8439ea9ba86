//! `reqwest`-backed transport

use super::{ApiRequest, ApiResponse, ApiTransport};
use async_trait::async_trait;
use cbts_core::{ApiConfig, CbtsError, CbtsResult, ErrorContext};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Transport that sends requests to the configured REST backend
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> CbtsResult<Self> {
        let base_url = config.base_url()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| CbtsError::Config {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("reqwest_transport").with_operation("new"),
            })?;

        info!("Created API transport for {}", base_url);

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> CbtsResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| CbtsError::Config {
                message: format!("Invalid endpoint path '{}': {}", path, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("reqwest_transport").with_operation("endpoint"),
            })
    }
}

fn map_send_error(error: reqwest::Error, url: &Url) -> CbtsError {
    let message = if error.is_timeout() {
        format!("Request to {} timed out", url)
    } else if error.is_connect() {
        format!("Could not connect to {}", url)
    } else {
        format!("Request to {} failed: {}", url, error)
    };

    CbtsError::Network {
        message,
        source: Some(Box::new(error)),
        context: ErrorContext::new("reqwest_transport")
            .with_operation("send")
            .with_metadata("url", url.as_str())
            .with_suggestion("Check that the backend is running and reachable"),
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> CbtsResult<ApiResponse> {
        let url = self.endpoint(&request.path)?;

        debug!(
            method = %request.method,
            url = %url,
            authenticated = request.bearer.is_some(),
            retry = request.is_retry,
            "Sending API request"
        );

        let mut builder = self.client.request(request.method.clone(), url.clone());
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| map_send_error(e, &url))?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| map_send_error(e, &url))?;

        debug!(status, url = %url, "Received API response");

        Ok(ApiResponse::new(status, decode_body(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_below_base() {
        let config = ApiConfig {
            base_url: "http://localhost:8000/api".to_string(),
            ..ApiConfig::default()
        };
        let transport = ReqwestTransport::new(&config).unwrap();

        assert_eq!(
            transport.endpoint("token/refresh/").unwrap().as_str(),
            "http://localhost:8000/api/token/refresh/"
        );
        assert_eq!(
            transport.endpoint("/bugs/12/").unwrap().as_str(),
            "http://localhost:8000/api/bugs/12/"
        );
    }

    #[test]
    fn test_decode_body_handles_empty_and_text() {
        assert_eq!(decode_body(b""), Value::Null);
        assert_eq!(decode_body(b"  \n"), Value::Null);
        assert_eq!(decode_body(br#"{"ok": true}"#)["ok"], Value::Bool(true));
        assert_eq!(
            decode_body(b"<html>Bad Gateway</html>"),
            Value::String("<html>Bad Gateway</html>".to_string())
        );
    }
}

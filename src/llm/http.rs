//! Shared HTTP plumbing for the OpenAI-compatible gateways

use super::wire::error_text;
use super::LlmError;
use crate::config::ConfigError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub fn build_client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ConfigError::HttpClient)
}

pub fn transport_error(e: &reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        LlmError::network(format!("Connection failed: {e}"))
    } else {
        LlmError::network(format!("Request failed: {e}"))
    }
}

/// Non-success response, read to completion
pub struct FailedResponse {
    pub status: u16,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl FailedResponse {
    pub async fn read(response: Response) -> Self {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Self {
            status,
            message: error_text(&body),
            retry_after,
        }
    }

    /// Carry the server's `Retry-After` on a classified error
    pub fn attach(&self, error: LlmError) -> LlmError {
        match self.retry_after {
            Some(after) => error.with_retry_after(after),
            None => error,
        }
    }
}

/// Consume a non-success response into a classified error
pub async fn status_error(response: Response) -> LlmError {
    let failed = FailedResponse::read(response).await;
    failed.attach(LlmError::from_status(failed.status, &failed.message))
}

/// Read a success body as JSON. An `error` object in a 2xx body is a protocol error.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, LlmError> {
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
    parse_json(&body)
}

pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, LlmError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| LlmError::malformed(format!("Response is not JSON: {e}")))?;
    if value.get("error").is_some_and(|e| !e.is_null()) {
        return Err(LlmError::protocol(error_text(body)));
    }
    serde_json::from_value(value)
        .map_err(|e| LlmError::malformed(format!("Unexpected response shape: {e}")))
}

//! Gateway error types

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Gateway error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub fn desync(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ThreadDesync, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Request cancelled")
    }

    /// Classify a non-success HTTP status.
    ///
    /// 404/422 are left to the caller: only the thread gateway treats them as
    /// a desync, everywhere else they are protocol errors.
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 => Self::unauthorized(format!("Authentication failed: {message}")),
            403 => Self::forbidden(format!("Forbidden: {message}")),
            429 => Self::rate_limited(format!("Rate limit exceeded: {message}")),
            500..=599 => Self::server_error(format!("Server error ({status}): {message}")),
            _ => Self::protocol(format!("HTTP {status}: {message}")),
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 401
    Unauthorized,
    /// HTTP 403
    Forbidden,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx, body echoed in the message
    ServerError,
    /// Body is not JSON or lacks expected fields
    MalformedResponse,
    /// Error object in the response, or an unexpected shape
    ProtocolError,
    /// A tool callback failed
    ToolExecutionError,
    /// Remote thread or run is gone
    ThreadDesync,
    /// Transport failure or timeout
    Network,
    /// Aborted through the session's cancellation signal
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::MalformedResponse => "malformed_response",
            Self::ProtocolError => "protocol_error",
            Self::ToolExecutionError => "tool_execution_error",
            Self::ThreadDesync => "thread_desync",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a caller-side retry could plausibly succeed. The core itself
    /// never retries.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::ServerError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

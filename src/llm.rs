//! Remote model gateways
//!
//! Two gateways share one set of canonical shapes: the completion gateway
//! resends the whole history per call, the thread gateway talks to a remote
//! thread that accumulates history and executes runs against it.

mod error;
mod http;
mod openai;
mod threads;
mod types;
pub(crate) mod wire;

pub use error::{ErrorKind, LlmError};
pub use openai::OpenAiCompletionGateway;
pub use threads::OpenAiThreadGateway;
pub use types::*;

use crate::stream::StreamEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Instant;

/// Normalized event stream produced by a streaming call
pub type EventStream = BoxStream<'static, Result<StreamEvent, LlmError>>;

/// Stateless model access: the caller supplies the full history every time
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// One round trip, returning the assistant message
    async fn run(&self, request: &LlmRequest) -> Result<Message, LlmError>;

    /// Same request with `stream: true`, normalized into events
    async fn run_stream(&self, request: &LlmRequest) -> Result<EventStream, LlmError>;
}

/// Stateful model access against a remote thread
#[async_trait]
pub trait ThreadGateway: Send + Sync {
    async fn create_thread(&self) -> Result<String, LlmError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<(), LlmError>;

    async fn create_run(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<ThreadRun, LlmError>;

    async fn create_run_stream(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<EventStream, LlmError>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun, LlmError>;

    /// Runs on the thread, newest first
    async fn get_runs(&self, thread_id: &str) -> Result<Vec<ThreadRun>, LlmError>;

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, LlmError>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ThreadRun, LlmError>;

    /// Append a message to the thread without starting a run
    async fn create_thread_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<Message, LlmError>;
}

#[async_trait]
impl<T: CompletionGateway + ?Sized> CompletionGateway for Arc<T> {
    async fn run(&self, request: &LlmRequest) -> Result<Message, LlmError> {
        (**self).run(request).await
    }

    async fn run_stream(&self, request: &LlmRequest) -> Result<EventStream, LlmError> {
        (**self).run_stream(request).await
    }
}

#[async_trait]
impl<T: ThreadGateway + ?Sized> ThreadGateway for Arc<T> {
    async fn create_thread(&self) -> Result<String, LlmError> {
        (**self).create_thread().await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), LlmError> {
        (**self).delete_thread(thread_id).await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<ThreadRun, LlmError> {
        (**self).create_run(thread_id, request).await
    }

    async fn create_run_stream(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<EventStream, LlmError> {
        (**self).create_run_stream(thread_id, request).await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun, LlmError> {
        (**self).get_run(thread_id, run_id).await
    }

    async fn get_runs(&self, thread_id: &str) -> Result<Vec<ThreadRun>, LlmError> {
        (**self).get_runs(thread_id).await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, LlmError> {
        (**self).get_messages(thread_id).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ThreadRun, LlmError> {
        (**self)
            .submit_tool_outputs(thread_id, run_id, outputs)
            .await
    }

    async fn create_thread_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<Message, LlmError> {
        (**self).create_thread_message(thread_id, message).await
    }
}

/// Logging wrapper for gateways
pub struct LoggingGateway<G> {
    inner: G,
    label: String,
}

impl<G> LoggingGateway<G> {
    pub fn new(inner: G, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }

    fn record<T>(&self, operation: &str, start: Instant, result: &Result<T, LlmError>) {
        let duration = start.elapsed();
        match result {
            Ok(_) => {
                tracing::info!(
                    gateway = %self.label,
                    operation,
                    duration_ms = %duration.as_millis(),
                    "Gateway call completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    gateway = %self.label,
                    operation,
                    duration_ms = %duration.as_millis(),
                    kind = %e.kind,
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Gateway call failed"
                );
            }
        }
    }
}

#[async_trait]
impl<G: CompletionGateway> CompletionGateway for LoggingGateway<G> {
    async fn run(&self, request: &LlmRequest) -> Result<Message, LlmError> {
        let start = Instant::now();
        let result = self.inner.run(request).await;
        self.record("run", start, &result);
        if let Ok(message) = &result {
            tracing::debug!(
                message_id = %message.id,
                tool_calls = message.tool_calls.len(),
                "Model replied"
            );
        }
        result
    }

    async fn run_stream(&self, request: &LlmRequest) -> Result<EventStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.run_stream(request).await;
        self.record("run_stream", start, &result);
        result
    }
}

#[async_trait]
impl<G: ThreadGateway> ThreadGateway for LoggingGateway<G> {
    async fn create_thread(&self) -> Result<String, LlmError> {
        let start = Instant::now();
        let result = self.inner.create_thread().await;
        self.record("create_thread", start, &result);
        result
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), LlmError> {
        let start = Instant::now();
        let result = self.inner.delete_thread(thread_id).await;
        self.record("delete_thread", start, &result);
        result
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<ThreadRun, LlmError> {
        let start = Instant::now();
        let result = self.inner.create_run(thread_id, request).await;
        self.record("create_run", start, &result);
        result
    }

    async fn create_run_stream(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<EventStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.create_run_stream(thread_id, request).await;
        self.record("create_run_stream", start, &result);
        result
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun, LlmError> {
        let start = Instant::now();
        let result = self.inner.get_run(thread_id, run_id).await;
        self.record("get_run", start, &result);
        result
    }

    async fn get_runs(&self, thread_id: &str) -> Result<Vec<ThreadRun>, LlmError> {
        let start = Instant::now();
        let result = self.inner.get_runs(thread_id).await;
        self.record("get_runs", start, &result);
        result
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, LlmError> {
        let start = Instant::now();
        let result = self.inner.get_messages(thread_id).await;
        self.record("get_messages", start, &result);
        result
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ThreadRun, LlmError> {
        let start = Instant::now();
        let result = self
            .inner
            .submit_tool_outputs(thread_id, run_id, outputs)
            .await;
        self.record("submit_tool_outputs", start, &result);
        result
    }

    async fn create_thread_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<Message, LlmError> {
        let start = Instant::now();
        let result = self.inner.create_thread_message(thread_id, message).await;
        self.record("create_thread_message", start, &result);
        result
    }
}

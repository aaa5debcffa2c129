//! Runtime for driving a session
//!
//! One task owns the [`Session`](crate::session::Session). Handles and
//! spawned actions talk to it over a single event channel; observers read a
//! broadcast of [`SessionEvent`]s or the latest [`SessionSnapshot`].

mod executor;

#[cfg(test)]
mod testing;

pub use executor::SessionRuntime;

use crate::llm::{Content, Message};
use crate::orchestrator::Event;
use crate::session::{SessionEvent, SessionSnapshot};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Stateful mode needs a thread gateway")]
    MissingThreadGateway,
    #[error("Session runtime has stopped")]
    Stopped,
    #[error("Timed out waiting for session")]
    Timeout,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    async fn send(&self, event: Event) -> Result<(), RuntimeError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }

    /// Append a user turn; returns the message as stored
    pub async fn send_message(&self, content: impl Into<Content>) -> Result<Message, RuntimeError> {
        let message = Message::user(content);
        self.send(Event::UserMessage(message.clone())).await?;
        Ok(message)
    }

    /// Answer a pending tool call from outside the registry
    pub async fn submit_tool_output(
        &self,
        tool_call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Result<(), RuntimeError> {
        self.send(Event::ToolOutputProvided {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            is_error,
        })
        .await
    }

    /// Drop history, errors and the remote thread; in-flight work is abandoned
    pub async fn reset(&self) -> Result<(), RuntimeError> {
        self.send(Event::Reset).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), RuntimeError> {
        self.send(Event::SetEnabled(enabled)).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait for a snapshot matching `predicate`
    pub async fn wait_until(
        &self,
        predicate: impl Fn(&SessionSnapshot) -> bool,
        timeout: Duration,
    ) -> Result<SessionSnapshot, RuntimeError> {
        let mut rx = self.snapshot_rx.clone();
        let result = match tokio::time::timeout(
            timeout,
            rx.wait_for(|snapshot| predicate(snapshot)),
        )
        .await
        {
            Err(_) => Err(RuntimeError::Timeout),
            Ok(Err(_)) => Err(RuntimeError::Stopped),
            Ok(Ok(snapshot)) => Ok(snapshot.clone()),
        };
        result
    }

    /// Stop the runtime and abandon in-flight work
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

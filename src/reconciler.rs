//! Thread reconciler: keeps a remote thread and the local store convergent
//!
//! Decisions are read-only queries; the orchestrator turns them into actions
//! and marks the matching in-progress flag.

use crate::llm::{LlmError, Message, Role, RunStatus, ThreadRun, ToolOutput};
use crate::store::MessageStore;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

/// Consecutive thread losses tolerated before the session halts
pub const MAX_DESYNCS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPhase {
    Uninitialized,
    ThreadReady,
    Synced,
    RunActive,
}

/// Outputs ready to submit for a run blocked on `requires_action`
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub run_id: String,
    pub outputs: Vec<ToolOutput>,
    /// Ids of the tool messages the outputs came from
    pub message_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ThreadReconciler {
    pub thread_id: Option<String>,
    pub active_run: Option<ThreadRun>,
    loaded: bool,
    pub creating_thread: bool,
    pub loading: bool,
    pub creating_run: bool,
    /// A streamed run is delivering its own status events
    pub run_streaming: bool,
    pub submitting: bool,
    pub polling: bool,
    pub refreshing: bool,
    pub needs_refresh: bool,
    pub pushing: bool,
    /// Thread losses since the last run made progress
    desyncs: u32,
}

impl ThreadReconciler {
    /// Resume a persisted thread; it is loaded before anything else happens
    pub fn resume(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    pub fn phase(&self) -> ThreadPhase {
        match (&self.thread_id, self.loaded) {
            (None, _) => ThreadPhase::Uninitialized,
            (Some(_), false) => ThreadPhase::ThreadReady,
            (Some(_), true) if self.has_active_run() => ThreadPhase::RunActive,
            (Some(_), true) => ThreadPhase::Synced,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn has_active_run(&self) -> bool {
        self.creating_run
            || self.run_streaming
            || self
                .active_run
                .as_ref()
                .is_some_and(|run| run.status.is_active())
    }

    /// Some remote operation is outstanding
    pub fn is_busy(&self) -> bool {
        self.creating_thread
            || self.loading
            || self.creating_run
            || self.run_streaming
            || self.submitting
            || self.polling
            || self.refreshing
            || self.pushing
            || self.needs_refresh
    }

    pub fn wants_thread(&self) -> bool {
        self.thread_id.is_none() && !self.creating_thread
    }

    pub fn wants_load(&self) -> Option<&str> {
        match &self.thread_id {
            Some(id) if !self.loaded && !self.loading => Some(id),
            _ => None,
        }
    }

    /// Every required call has a local tool message
    pub fn submission(&self, store: &MessageStore) -> Option<Submission> {
        if self.submitting || !self.loaded {
            return None;
        }
        let run = self.active_run.as_ref()?;
        let calls = run.required_tool_calls();
        if calls.is_empty() {
            return None;
        }

        let mut outputs = Vec::with_capacity(calls.len());
        let mut message_ids = Vec::with_capacity(calls.len());
        for call in calls {
            let message = store.tool_output(&call.id)?;
            outputs.push(ToolOutput::from_message(message)?);
            message_ids.push(message.id.clone());
        }
        Some(Submission {
            run_id: run.id.clone(),
            outputs,
            message_ids,
        })
    }

    pub fn wants_poll(&self) -> Option<(&str, &str)> {
        if self.polling || self.run_streaming || self.submitting {
            return None;
        }
        let thread_id = self.thread_id.as_deref()?;
        let run = self.active_run.as_ref()?;
        run.status
            .is_pollable()
            .then_some((thread_id, run.id.as_str()))
    }

    pub fn wants_refresh(&self) -> Option<&str> {
        if !self.needs_refresh || self.refreshing || !self.loaded {
            return None;
        }
        self.thread_id.as_deref()
    }

    /// Assistant turns to append to an idle thread without starting a run
    pub fn wants_push<'a>(&self, store: &'a MessageStore) -> Vec<&'a Message> {
        let Some(thread_id) = self.idle_thread() else {
            return Vec::new();
        };
        let unsynced = store.unsynced(thread_id);
        if unsynced.iter().any(|m| m.role == Role::User) {
            return Vec::new();
        }
        unsynced
    }

    /// Unsynced user input a run should answer, carried with any other
    /// unsynced turns. Input sent while a run was active waits for the next run.
    pub fn wants_run<'a>(&self, store: &'a MessageStore) -> Option<Vec<&'a Message>> {
        let thread_id = self.idle_thread()?;
        if !store.pending_tool_calls().is_empty() {
            return None;
        }
        let unsynced = store.unsynced(thread_id);
        unsynced
            .iter()
            .any(|m| m.role == Role::User)
            .then_some(unsynced)
    }

    /// A loaded thread with nothing outstanding
    pub fn idle_thread(&self) -> Option<&str> {
        if !self.loaded || self.has_active_run() || self.is_busy() {
            return None;
        }
        self.thread_id.as_deref()
    }

    pub fn thread_created(&mut self, thread_id: String) {
        tracing::info!(thread_id = %thread_id, "Thread created");
        self.creating_thread = false;
        self.thread_id = Some(thread_id);
        self.loaded = false;
        self.active_run = None;
    }

    /// Take the fetched runs (newest first) and messages; returns messages to merge
    pub fn loaded(&mut self, runs: Vec<ThreadRun>, messages: Vec<Message>) -> Vec<Message> {
        self.loading = false;
        self.loaded = true;
        self.active_run = runs.into_iter().next().filter(|run| run.status.is_active());

        let mut merged = messages;
        if let Some(message) = self.active_run.as_ref().and_then(required_action_message) {
            merged.push(message);
        }
        merged
    }

    pub fn run_started(&mut self, streaming: bool) {
        self.desyncs = 0;
        self.creating_run = false;
        self.run_streaming = streaming;
    }

    /// Fold a run status into local state. Returns the synthesized tool-call
    /// message for `requires_action`; terminal failures are errors.
    pub fn run_updated(&mut self, run: ThreadRun) -> Result<Option<Message>, LlmError> {
        if let Some(current) = &self.active_run {
            if current.id != run.id && current.status.is_active() && !run.status.is_active() {
                tracing::debug!(run_id = %run.id, "Ignoring status of a superseded run");
                return Ok(None);
            }
            if current.status != run.status {
                tracing::info!(run_id = %run.id, from = current.status.as_str(), to = run.status.as_str(), "Run status changed");
            }
        }

        let message = required_action_message(&run);
        let failure = match run.status {
            RunStatus::Failed
            | RunStatus::Expired
            | RunStatus::Cancelled
            | RunStatus::Incomplete => Some(LlmError::protocol(format!(
                "Run {} ended as {}: {}",
                run.id,
                run.status.as_str(),
                run.last_error.as_deref().unwrap_or("no error reported")
            ))),
            _ => None,
        };
        if run.status.is_success() {
            self.needs_refresh = true;
        }
        self.active_run = Some(run);

        match failure {
            Some(error) => Err(error),
            None => Ok(message),
        }
    }

    pub fn outputs_submitted(&mut self) {
        self.desyncs = 0;
        self.submitting = false;
    }

    pub fn refreshed(&mut self) {
        self.desyncs = 0;
        self.refreshing = false;
        self.needs_refresh = false;
    }

    /// The remote thread is gone: start over with a fresh one. Fails once
    /// fresh threads keep getting lost without a run getting anywhere.
    pub fn desync(&mut self) -> Result<(), LlmError> {
        let desyncs = self.desyncs + 1;
        tracing::warn!(thread_id = ?self.thread_id, desyncs, "Thread desynchronized, recreating");
        *self = Self {
            desyncs,
            ..Self::default()
        };
        if desyncs > MAX_DESYNCS {
            return Err(LlmError::protocol(format!(
                "Remote thread lost {desyncs} times in a row; check the run target"
            )));
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Assistant message carrying the calls a run is blocked on
fn required_action_message(run: &ThreadRun) -> Option<Message> {
    let calls = run.required_tool_calls();
    let first = calls.first()?;
    let mut message = Message::assistant("")
        .with_id(format!("{}:{}", run.id, first.id))
        .with_tool_calls(calls.to_vec())
        .with_created_at(second_precision(Utc::now()));
    message.thread_id = run.thread_id.clone();
    Some(message)
}

/// Remote timestamps have second precision; local ones are truncated to match
pub fn second_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(0).unwrap_or(at)
}

//! Session state owned by the runtime task

use crate::config::{Mode, SessionConfig};
use crate::llm::{ErrorKind, LlmError, Message, RunStatus, RunTarget};
use crate::reconciler::{ThreadPhase, ThreadReconciler};
use crate::store::MessageStore;
use crate::stream::StreamAccumulator;
use crate::tools::ToolDispatcher;
use serde::Serialize;

/// One conversation. Only the runtime task mutates it.
#[derive(Debug)]
pub struct Session {
    pub store: MessageStore,
    pub thread: ThreadReconciler,
    pub assistant_id: Option<String>,
    pub dispatcher: ToolDispatcher,
    /// Accumulator of the stream currently open, if any
    pub stream: Option<StreamAccumulator>,
    pub enabled: bool,
    pub started: bool,
    pub starting: bool,
    pub model_in_flight: bool,
    pub error: Option<LlmError>,
    /// Bumped on reset; results of older tasks are discarded
    pub epoch: u64,
}

impl Session {
    /// New session. A persisted thread is reused only if it belongs to the
    /// configured assistant.
    pub fn new(
        config: &SessionConfig,
        persisted_thread: Option<String>,
        persisted_assistant: Option<String>,
    ) -> Self {
        let assistant_id = match &config.mode {
            Mode::Stateful {
                target: RunTarget::Assistant(id),
            } => Some(id.clone()),
            Mode::Stateful { .. } | Mode::Stateless => None,
        };

        let thread = match persisted_thread {
            Some(thread_id) if config.mode.is_stateful() && persisted_assistant == assistant_id => {
                tracing::info!(thread_id = %thread_id, "Resuming persisted thread");
                ThreadReconciler::resume(thread_id)
            }
            _ => ThreadReconciler::default(),
        };

        Self {
            store: MessageStore::new(),
            thread,
            assistant_id,
            dispatcher: ToolDispatcher::default(),
            stream: None,
            enabled: true,
            started: false,
            starting: false,
            model_in_flight: false,
            error: None,
            epoch: 0,
        }
    }

    /// Anything outstanding that will produce a follow-up event
    pub fn is_busy(&self) -> bool {
        self.starting
            || self.model_in_flight
            || self.dispatcher.in_flight() > 0
            || self.thread.is_busy()
            || self.thread.has_active_run()
    }

    /// Nothing outstanding and the model has the last word
    pub fn awaiting_input(&self) -> bool {
        self.enabled && self.error.is_none() && !self.is_busy() && self.store.awaiting_user_input()
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            phase: self.thread.phase(),
            thread_id: self.thread.thread_id.clone(),
            run_status: self.thread.active_run.as_ref().map(|run| run.status),
            enabled: self.enabled,
            busy: self.is_busy(),
            error: self.error.as_ref().map(|e| e.kind),
            messages: self.store.len(),
        }
    }
}

/// Observable summary of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: ThreadPhase,
    pub thread_id: Option<String>,
    pub run_status: Option<RunStatus>,
    pub enabled: bool,
    pub busy: bool,
    pub error: Option<ErrorKind>,
    pub messages: usize,
}

/// Broadcast to session subscribers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message was added or changed
    Message(Message),
    StateChange(SessionState),
    /// The model replied and nothing else is pending
    AwaitingInput,
    Error(LlmError),
}

/// Latest view of a session, published after every change
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub state: SessionState,
    pub error: Option<LlmError>,
}

impl SessionSnapshot {
    pub fn of(session: &Session) -> Self {
        Self {
            messages: session.store.get().to_vec(),
            state: session.state(),
            error: session.error.clone(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

//! Actions started by the orchestrator

use crate::llm::{LlmRequest, Message, RunRequest, ToolCall};
use crate::reconciler::Submission;

/// Work the runtime runs as a spawned task; each reports back as a [`super::TaskResult`]
#[derive(Debug, Clone)]
pub enum Action {
    CreateThread,
    LoadThread {
        thread_id: String,
    },
    SubmitToolOutputs {
        thread_id: String,
        submission: Submission,
    },
    ExecuteTool(ToolCall),
    /// Stateless model call
    RequestModel(LlmRequest),
    CreateRun {
        thread_id: String,
        request: RunRequest,
        /// Ids of the messages carried by the run
        sent: Vec<String>,
    },
    /// Repeating poll, bound to the session until the run stops being pollable
    PollRun {
        thread_id: String,
        run_id: String,
    },
    RefreshMessages {
        thread_id: String,
    },
    PushMessages {
        thread_id: String,
        messages: Vec<Message>,
    },
    /// Start hook with a fixed greeting
    Greet(Message),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateThread => ActionKind::CreateThread,
            Action::LoadThread { .. } => ActionKind::LoadThread,
            Action::SubmitToolOutputs { .. } => ActionKind::SubmitToolOutputs,
            Action::ExecuteTool(_) => ActionKind::ExecuteTool,
            Action::RequestModel(_) => ActionKind::RequestModel,
            Action::CreateRun { .. } => ActionKind::CreateRun,
            Action::PollRun { .. } => ActionKind::PollRun,
            Action::RefreshMessages { .. } => ActionKind::RefreshMessages,
            Action::PushMessages { .. } => ActionKind::PushMessages,
            Action::Greet(_) => ActionKind::Greet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreateThread,
    LoadThread,
    SubmitToolOutputs,
    ExecuteTool,
    RequestModel,
    CreateRun,
    PollRun,
    RefreshMessages,
    PushMessages,
    Greet,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::CreateThread => "create_thread",
            ActionKind::LoadThread => "load_thread",
            ActionKind::SubmitToolOutputs => "submit_tool_outputs",
            ActionKind::ExecuteTool => "execute_tool",
            ActionKind::RequestModel => "request_model",
            ActionKind::CreateRun => "create_run",
            ActionKind::PollRun => "poll_run",
            ActionKind::RefreshMessages => "refresh_messages",
            ActionKind::PushMessages => "push_messages",
            ActionKind::Greet => "greet",
        }
    }
}

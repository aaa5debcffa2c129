//! Events consumed by `apply`

use super::ActionKind;
use crate::llm::{LlmError, Message, ThreadRun};
use crate::stream::StreamEvent;

#[derive(Debug, Clone)]
pub enum Event {
    UserMessage(Message),
    /// Tool result supplied by the host instead of a registered callback
    ToolOutputProvided {
        tool_call_id: String,
        output: String,
        is_error: bool,
    },
    Reset,
    SetEnabled(bool),
    /// Completion of a spawned task, tagged with the epoch it started in
    Task {
        epoch: u64,
        result: TaskResult,
    },
}

impl Event {
    pub fn task(epoch: u64, result: TaskResult) -> Self {
        Event::Task { epoch, result }
    }
}

/// Which call an open stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Model,
    Run,
}

impl StreamSource {
    pub fn action(self) -> ActionKind {
        match self {
            StreamSource::Model => ActionKind::RequestModel,
            StreamSource::Run => ActionKind::CreateRun,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskResult {
    ThreadCreated(String),
    ThreadLoaded {
        runs: Vec<ThreadRun>,
        messages: Vec<Message>,
    },
    ModelResponse(Message),
    RunCreated {
        run: ThreadRun,
        sent: Vec<String>,
    },
    /// A streamed run was accepted; its status arrives as stream events
    RunStreamOpened {
        sent: Vec<String>,
    },
    Stream {
        source: StreamSource,
        event: StreamEvent,
    },
    StreamClosed(StreamSource),
    RunPolled(ThreadRun),
    PollStopped,
    ToolOutputsSubmitted {
        thread_id: String,
        run: ThreadRun,
        message_ids: Vec<String>,
    },
    MessagesRefreshed(Vec<Message>),
    MessagesPushed(Vec<Message>),
    ToolFinished(Message),
    Greeted(Message),
    Failed {
        action: ActionKind,
        error: LlmError,
    },
}

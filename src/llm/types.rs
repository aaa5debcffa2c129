//! Canonical conversation shapes shared by both gateways

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved tool name the model uses to bundle several invocations into one call
pub const PARALLEL_TOOL_USE: &str = "multi_tool_use.parallel";

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" | "developer" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// Message body: plain text or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl Content {
    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }

    /// Append streamed text, keeping parts intact
    pub fn push_text(&mut self, fragment: &str) {
        match self {
            Content::Text(text) => text.push_str(fragment),
            Content::Parts(parts) => match parts.last_mut() {
                Some(ContentPart::Text { text }) => text.push_str(fragment),
                _ => parts.push(ContentPart::Text {
                    text: fragment.to_string(),
                }),
            },
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

/// One part of a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { source: ImageSource },
}

/// Image source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Url {
        url: String,
    },
    Base64 {
        media_type: String,
        data: String,
    },
    /// Remote file handle (thread messages only)
    File {
        file_id: String,
    },
}

impl ImageSource {
    /// URL form accepted by chat-completion image parts
    pub fn to_url(&self) -> Option<String> {
        match self {
            ImageSource::Url { url } => Some(url.clone()),
            ImageSource::Base64 { media_type, data } => {
                Some(format!("data:{media_type};base64,{data}"))
            }
            ImageSource::File { .. } => None,
        }
    }
}

/// Whether a streamed message is still receiving fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    InProgress,
    #[default]
    Completed,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Remote thread this message is known to; `None` means not yet synced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub status: MessageStatus,
    /// Tool message carrying a failure
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
            thread_id: None,
            status: MessageStatus::Completed,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    /// Tool result for `tool_call_id`; failures are marked and prefixed
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let output = output.into();
        let content = if is_error {
            format!("Error: {output}")
        } else {
            output
        };
        let mut message = Self::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message.is_error = is_error;
        message
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.status == MessageStatus::Completed
    }

    pub fn is_synced_to(&self, thread_id: &str) -> bool {
        self.thread_id.as_deref() == Some(thread_id)
    }
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text; only valid once the owning message is complete
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument text; an empty string is an empty object
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }

    /// Classify the call, unpacking a parallel batch into its sub-calls
    pub fn kind(&self) -> Result<ToolCallKind, serde_json::Error> {
        let arguments = self.parse_arguments()?;
        if self.name != PARALLEL_TOOL_USE {
            return Ok(ToolCallKind::Single(arguments));
        }

        let batch: ParallelBatch = serde_json::from_value(arguments)?;
        Ok(ToolCallKind::ParallelBatch(
            batch
                .tool_uses
                .into_iter()
                .map(|usage| SubCall {
                    name: usage
                        .recipient_name
                        .strip_prefix("functions.")
                        .unwrap_or(&usage.recipient_name)
                        .to_string(),
                    arguments: usage.parameters,
                })
                .collect(),
        ))
    }
}

/// Parsed shape of a tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallKind {
    Single(Value),
    ParallelBatch(Vec<SubCall>),
}

/// One logical invocation inside a parallel batch
#[derive(Debug, Clone, PartialEq)]
pub struct SubCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Deserialize)]
struct ParallelBatch {
    tool_uses: Vec<ParallelToolUse>,
}

#[derive(Deserialize)]
struct ParallelToolUse {
    recipient_name: String,
    #[serde(default)]
    parameters: Value,
}

/// Result half of a tool call, as submitted to a thread run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl ToolOutput {
    /// Derive from a tool message
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.role != Role::Tool {
            return None;
        }
        Some(Self {
            tool_call_id: message.tool_call_id.clone()?,
            output: message.content.text(),
        })
    }
}

/// Tool definition sent to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Stateless model request
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub instructions: Option<String>,
    pub extra_instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Instructions followed by extra instructions, blank-line separated
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.instructions, &self.extra_instructions]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// What a thread run executes against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    Assistant(String),
    Graph(String),
}

/// Stateful run request
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: RunTarget,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub additional_instructions: Option<String>,
    /// Messages not yet present on the thread
    pub additional_messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
}

/// Remote run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Success,
    Cancelling,
    Expired,
    Failed,
    Incomplete,
    Cancelled,
}

impl RunStatus {
    /// At most one run per thread may be active
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunStatus::Queued
                | RunStatus::InProgress
                | RunStatus::RequiresAction
                | RunStatus::Cancelling
        )
    }

    /// Statuses that only change on the server, so they are polled
    pub fn is_pollable(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Success => "success",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Expired => "expired",
            RunStatus::Failed => "failed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Action a run is blocked on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredAction {
    SubmitToolOutputs { tool_calls: Vec<ToolCall> },
}

/// Remote asynchronous model execution against a thread
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRun {
    pub id: String,
    pub thread_id: Option<String>,
    pub status: RunStatus,
    pub required_action: Option<RequiredAction>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ThreadRun {
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            status,
            required_action: None,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    #[must_use]
    pub fn requiring(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.status = RunStatus::RequiresAction;
        self.required_action = Some(RequiredAction::SubmitToolOutputs { tool_calls });
        self
    }

    /// Tool calls the run is waiting on, if any
    pub fn required_tool_calls(&self) -> &[ToolCall] {
        match (&self.status, &self.required_action) {
            (RunStatus::RequiresAction, Some(RequiredAction::SubmitToolOutputs { tool_calls })) => {
                tool_calls
            }
            _ => &[],
        }
    }
}

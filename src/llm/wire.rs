//! OpenAI-compatible wire shapes and their mapping onto canonical types

use super::types::{
    Content, ContentPart, ImageSource, LlmRequest, Message, MessageStatus, RequiredAction, Role,
    RunRequest, RunStatus, RunTarget, ThreadRun, ToolCall, ToolDefinition, ToolOutput,
};
use super::LlmError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata key carrying the local message id through a remote thread
pub const LOCAL_ID_KEY: &str = "local_id";

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunction,
}

#[derive(Debug, Serialize)]
pub struct ChatFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

/// One `data:` payload of a streamed chat completion
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: Option<String>,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkToolCall {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Text of an error payload: `{"error":{"message":..}}`, `{"message":..}`, or the raw body
pub fn error_text(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    value
        .get("error")
        .unwrap_or(&value)
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map_or_else(|| body.to_string(), str::to_string)
}

// ---------------------------------------------------------------------------
// Threads and runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WireThread {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct WireList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub last_id: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct WireRun {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<WireRequiredAction>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<WireRunError>,
}

#[derive(Debug, Deserialize)]
pub struct WireRequiredAction {
    #[serde(default)]
    pub submit_tool_outputs: Option<WireSubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
pub struct WireSubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct WireRunError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireThreadMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: Vec<WireContentBlock>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentBlock {
    Text {
        text: WireText,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    ImageFile {
        image_file: WireImageFile,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct WireText {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct WireImageFile {
    pub file_id: String,
}

/// `thread.message.delta` payload
#[derive(Debug, Deserialize)]
pub struct WireMessageDelta {
    pub id: String,
    pub delta: WireDeltaBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireDeltaBody {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<WireDeltaBlock>,
}

#[derive(Debug, Deserialize)]
pub struct WireDeltaBlock {
    #[serde(default)]
    pub text: Option<WireDeltaText>,
}

#[derive(Debug, Deserialize)]
pub struct WireDeltaText {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WireNewMessage {
    pub role: &'static str,
    pub content: WireNewContent,
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WireNewContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Serialize)]
pub struct WireRunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_messages: Vec<WireNewMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub tool_outputs: &'a [ToolOutput],
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

pub fn chat_request(request: &LlmRequest, stream: bool) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system_prompt() {
        messages.push(ChatMessage {
            role: "system",
            content: Some(ChatContent::Text(system)),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    messages.extend(request.messages.iter().map(chat_message));

    let tools = tool_definitions(&request.tools);
    ChatRequest {
        model: request.model.clone(),
        messages,
        tool_choice: tools.as_ref().map(|_| "auto"),
        tools,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream,
    }
}

fn chat_message(message: &Message) -> ChatMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(message.tool_calls.iter().map(chat_tool_call).collect())
    };
    // An assistant turn that only calls tools carries no content
    let content = if tool_calls.is_some() && message.content.is_empty() {
        None
    } else {
        Some(chat_content(&message.content))
    };

    ChatMessage {
        role: message.role.as_str(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn chat_content(content: &Content) -> ChatContent {
    match content {
        Content::Text(text) => ChatContent::Text(text.clone()),
        Content::Parts(parts) => ChatContent::Parts(parts.iter().filter_map(chat_part).collect()),
    }
}

fn chat_part(part: &ContentPart) -> Option<ChatPart> {
    match part {
        ContentPart::Text { text } => Some(ChatPart::Text { text: text.clone() }),
        ContentPart::Image { source } => {
            let Some(url) = source.to_url() else {
                tracing::warn!("Dropping image part without a URL form");
                return None;
            };
            Some(ChatPart::ImageUrl {
                image_url: ImageUrl { url },
            })
        }
    }
}

fn chat_tool_call(call: &ToolCall) -> ChatToolCall {
    ChatToolCall {
        id: call.id.clone(),
        kind: function_kind(),
        function: ChatFunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

pub fn tool_definitions(tools: &[ToolDefinition]) -> Option<Vec<ChatTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| ChatTool {
                kind: "function",
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect(),
    )
}

pub fn tool_calls(calls: Vec<ChatToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .filter(|tc| !tc.function.name.is_empty())
        .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
        .collect()
}

/// Map a chat-completion response; exactly one choice is accepted
pub fn response_message(response: ChatResponse) -> Result<Message, LlmError> {
    let count = response.choices.len();
    let Some(choice) = response.choices.into_iter().next().filter(|_| count == 1) else {
        return Err(LlmError::protocol(format!(
            "Expected exactly one choice, got {count}"
        )));
    };

    let mut message = Message::assistant(choice.message.content.unwrap_or_default())
        .with_tool_calls(tool_calls(choice.message.tool_calls.unwrap_or_default()));
    if let Some(id) = response.id {
        message.id = id;
    }
    Ok(message)
}

pub fn timestamp(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

pub fn run(wire: WireRun) -> ThreadRun {
    let required_action = wire
        .required_action
        .and_then(|action| action.submit_tool_outputs)
        .map(|submit| RequiredAction::SubmitToolOutputs {
            tool_calls: tool_calls(submit.tool_calls),
        });
    let last_error = wire.last_error.map(|e| match (e.code, e.message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (_, Some(message)) => message,
        (Some(code), None) => code,
        (None, None) => "unknown error".to_string(),
    });

    ThreadRun {
        id: wire.id,
        thread_id: wire.thread_id,
        status: wire.status,
        required_action,
        created_at: timestamp(wire.created_at),
        last_error,
    }
}

/// Map a thread message, restoring the local id when one was attached
pub fn thread_message(wire: WireThreadMessage, thread_id: &str) -> Message {
    let local_id = wire
        .metadata
        .as_ref()
        .and_then(|m| m.get(LOCAL_ID_KEY))
        .and_then(Value::as_str)
        .map(str::to_string);
    let role = Role::parse(&wire.role).unwrap_or(Role::Assistant);
    let status = match wire.status.as_deref() {
        Some("in_progress") => MessageStatus::InProgress,
        _ => MessageStatus::Completed,
    };

    let mut message = Message::new(role, thread_content(wire.content))
        .with_id(local_id.unwrap_or(wire.id))
        .with_created_at(timestamp(wire.created_at))
        .with_thread_id(wire.thread_id.unwrap_or_else(|| thread_id.to_string()));
    message.status = status;
    message
}

fn thread_content(blocks: Vec<WireContentBlock>) -> Content {
    let mut parts: Vec<ContentPart> = blocks
        .into_iter()
        .filter_map(|block| match block {
            WireContentBlock::Text { text } => Some(ContentPart::Text { text: text.value }),
            WireContentBlock::ImageUrl { image_url } => Some(ContentPart::Image {
                source: ImageSource::Url { url: image_url.url },
            }),
            WireContentBlock::ImageFile { image_file } => Some(ContentPart::Image {
                source: ImageSource::File {
                    file_id: image_file.file_id,
                },
            }),
            WireContentBlock::Unsupported => None,
        })
        .collect();

    if let [ContentPart::Text { .. }] = parts.as_slice() {
        if let Some(ContentPart::Text { text }) = parts.pop() {
            return Content::Text(text);
        }
    }
    if parts.is_empty() {
        Content::default()
    } else {
        Content::Parts(parts)
    }
}

/// Thread-side form of a local message; only user and assistant turns exist there
pub fn new_thread_message(message: &Message) -> Option<WireNewMessage> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System | Role::Tool => return None,
    };
    let content = match &message.content {
        Content::Text(text) => WireNewContent::Text(text.clone()),
        Content::Parts(parts) => {
            WireNewContent::Parts(parts.iter().filter_map(chat_part).collect())
        }
    };
    let mut metadata = serde_json::Map::new();
    metadata.insert(LOCAL_ID_KEY.to_string(), Value::String(message.id.clone()));

    Some(WireNewMessage {
        role,
        content,
        metadata,
    })
}

pub fn run_request(request: &RunRequest, stream: bool) -> WireRunRequest {
    let (assistant_id, graph_id) = match &request.target {
        RunTarget::Assistant(id) => (Some(id.clone()), None),
        RunTarget::Graph(id) => (None, Some(id.clone())),
    };
    WireRunRequest {
        assistant_id,
        graph_id,
        model: request.model.clone(),
        instructions: request.instructions.clone(),
        additional_instructions: request.additional_instructions.clone(),
        additional_messages: request
            .additional_messages
            .iter()
            .filter_map(new_thread_message)
            .collect(),
        tools: tool_definitions(&request.tools),
        temperature: request.temperature,
        stream,
    }
}

//! Segment -> semantic event mapping

use super::decoder::Segment;
use super::{MessageDelta, StreamEvent, ToolCallDelta};
use crate::llm::wire::{self, ChatChunk, WireMessageDelta, WireRun, WireThreadMessage};
use crate::llm::{LlmError, MessageStatus, Role};
use serde_json::Value;

const DONE_MARKER: &str = "[DONE]";

/// Map one segment onto zero or more events. Unrecognized shapes yield nothing.
pub fn normalize(segment: &Segment) -> Vec<StreamEvent> {
    let data = segment.data.trim();
    if data == DONE_MARKER || segment.event.as_deref() == Some("done") {
        return vec![StreamEvent::Done];
    }
    if segment.event.as_deref() == Some("error") {
        return vec![StreamEvent::Error(stream_error(data))];
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        tracing::debug!(event = ?segment.event, "Ignoring non-JSON stream segment");
        return Vec::new();
    };
    if value.get("error").is_some_and(|e| !e.is_null()) {
        return vec![StreamEvent::Error(stream_error(data))];
    }

    match value.get("object").and_then(Value::as_str) {
        Some("thread.run") => run_event(value),
        Some("thread.message") => message_event(value),
        Some("thread.message.delta") => message_delta_event(value),
        Some("chat.completion.chunk") => chunk_events(value),
        None if value.get("choices").is_some() => chunk_events(value),
        _ => Vec::new(),
    }
}

fn stream_error(data: &str) -> LlmError {
    let message = wire::error_text(data);
    LlmError::protocol(format!("Stream error: {message}"))
}

fn run_event(value: Value) -> Vec<StreamEvent> {
    match serde_json::from_value::<WireRun>(value) {
        Ok(run) => vec![StreamEvent::RunStatus(wire::run(run))],
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognized run payload");
            Vec::new()
        }
    }
}

fn message_event(value: Value) -> Vec<StreamEvent> {
    let message = match serde_json::from_value::<WireThreadMessage>(value) {
        Ok(m) => {
            let thread_id = m.thread_id.clone().unwrap_or_default();
            wire::thread_message(m, &thread_id)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognized message payload");
            return Vec::new();
        }
    };

    if message.status == MessageStatus::InProgress {
        vec![StreamEvent::MessagePartial(MessageDelta {
            id: message.id,
            role: Some(message.role),
            content: None,
            tool_calls: Vec::new(),
        })]
    } else {
        vec![StreamEvent::MessageCompleted {
            id: message.id.clone(),
            message: Some(message),
        }]
    }
}

fn message_delta_event(value: Value) -> Vec<StreamEvent> {
    let Ok(delta) = serde_json::from_value::<WireMessageDelta>(value) else {
        return Vec::new();
    };
    let text: String = delta
        .delta
        .content
        .iter()
        .filter_map(|block| block.text.as_ref()?.value.as_deref())
        .collect();

    vec![StreamEvent::MessagePartial(MessageDelta {
        id: delta.id,
        role: delta.delta.role.as_deref().and_then(Role::parse),
        content: (!text.is_empty()).then_some(text),
        tool_calls: Vec::new(),
    })]
}

fn chunk_events(value: Value) -> Vec<StreamEvent> {
    let Ok(chunk) = serde_json::from_value::<ChatChunk>(value) else {
        return Vec::new();
    };
    // An empty id is resolved to one id per stream by the accumulator
    let id = chunk.id.unwrap_or_default();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Vec::new();
    };

    let tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    let mut events = vec![StreamEvent::MessagePartial(MessageDelta {
        id: id.clone(),
        role: choice.delta.role.as_deref().and_then(Role::parse),
        content: choice.delta.content,
        tool_calls,
    })];
    if choice.finish_reason.is_some() {
        events.push(StreamEvent::MessageCompleted { id, message: None });
    }
    events
}

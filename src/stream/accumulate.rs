//! Folds stream events into messages

use super::{MessageDelta, StreamEvent};
use crate::llm::{Message, MessageStatus, Role, ToolCall};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug)]
struct Partial {
    message: Message,
    /// Tool calls by positional index; gaps stay `None` until filled
    slots: Vec<Option<ToolCall>>,
}

impl Partial {
    fn new(id: &str, role: Role) -> Self {
        let mut message = Message::new(role, "").with_id(id);
        message.status = MessageStatus::InProgress;
        Self {
            message,
            slots: Vec::new(),
        }
    }

    fn merge(&mut self, delta: MessageDelta) {
        if let Some(role) = delta.role {
            self.message.role = role;
        }
        if let Some(text) = delta.content.as_deref() {
            self.message.content.push_text(text);
        }
        for fragment in delta.tool_calls {
            if self.slots.len() <= fragment.index {
                self.slots.resize(fragment.index + 1, None);
            }
            let slot = self.slots[fragment.index].get_or_insert_with(|| ToolCall::new("", "", ""));
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                slot.id = id;
            }
            if let Some(name) = fragment.name.as_deref() {
                slot.name.push_str(name);
            }
            if let Some(arguments) = fragment.arguments.as_deref() {
                slot.arguments.push_str(arguments);
            }
        }
        self.message.tool_calls = self.slots.iter().flatten().cloned().collect();
    }

    /// Close the message; slots that never received a name are dropped
    fn complete(mut self) -> Message {
        self.message.tool_calls = self
            .slots
            .into_iter()
            .flatten()
            .filter(|call| !call.name.is_empty())
            .collect();
        self.message.status = MessageStatus::Completed;
        self.message
    }
}

/// Folds [`StreamEvent`]s into message snapshots ready for the store.
///
/// One accumulator covers one stream. Events without an id all belong to a
/// single message whose id is minted on first use.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    thread_id: Option<String>,
    partials: HashMap<String, Partial>,
    unnamed_id: Option<String>,
}

impl StreamAccumulator {
    /// Accumulator whose messages belong to a remote thread
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    /// Apply one event, returning the messages it changed
    pub fn apply(&mut self, event: StreamEvent) -> Vec<Message> {
        match event {
            StreamEvent::MessagePartial(mut delta) => {
                delta.id = self.resolve(delta.id);
                let id = delta.id.clone();
                let role = delta.role.unwrap_or(Role::Assistant);
                let partial = self
                    .partials
                    .entry(id)
                    .or_insert_with(|| Partial::new(&delta.id, role));
                partial.merge(delta);
                let snapshot = partial.message.clone();
                vec![self.stamp(snapshot)]
            }
            StreamEvent::MessageCompleted { id, message } => {
                let id = self.resolve(id);
                let partial = self.partials.remove(&id);
                let completed = match (message, partial) {
                    (Some(mut full), _) => {
                        full.status = MessageStatus::Completed;
                        full
                    }
                    (None, Some(partial)) => partial.complete(),
                    (None, None) => return Vec::new(),
                };
                vec![self.stamp(completed)]
            }
            StreamEvent::RunStatus(_) | StreamEvent::Error(_) | StreamEvent::Done => Vec::new(),
        }
    }

    /// Close every message still open, e.g. when the connection ends early
    pub fn finish(&mut self) -> Vec<Message> {
        let partials: Vec<Partial> = self.partials.drain().map(|(_, p)| p).collect();
        partials
            .into_iter()
            .map(|p| {
                let message = p.complete();
                self.stamp(message)
            })
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.partials.is_empty()
    }

    fn resolve(&mut self, id: String) -> String {
        if !id.is_empty() {
            return id;
        }
        self.unnamed_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    fn stamp(&self, mut message: Message) -> Message {
        if let Some(thread_id) = &self.thread_id {
            message.thread_id = Some(thread_id.clone());
        }
        message
    }
}

//! Order-preserving message log with merge-by-id semantics

use crate::llm::{Message, Role, ToolCall};
use std::collections::HashSet;

/// Conversation history.
///
/// Sorted by `created_at` (ties keep arrival order), except that every tool
/// message sits directly after the assistant message declaring its call, in
/// declaration order.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge by id. Returns whether the store changed.
    pub fn append(&mut self, message: Message) -> bool {
        let changed = match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => merge(existing, message),
            None => {
                self.messages.push(message);
                true
            }
        };
        if changed {
            self.reorder();
        }
        changed
    }

    pub fn get(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn find(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool message answering `tool_call_id`
    pub fn tool_output(&self, tool_call_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(tool_call_id))
    }

    /// Calls in completed assistant messages that have no tool message yet
    pub fn pending_tool_calls(&self) -> Vec<&ToolCall> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.is_complete())
            .flat_map(|m| m.tool_calls.iter())
            .filter(|call| !answered.contains(call.id.as_str()))
            .collect()
    }

    /// The model has the last word: nothing to do until the user speaks
    pub fn awaiting_user_input(&self) -> bool {
        match self.messages.last() {
            None => true,
            Some(last) => {
                last.role == Role::Assistant && last.is_complete() && !last.has_tool_calls()
            }
        }
    }

    /// New input the model has not replied to, with every tool call answered
    pub fn needs_reply(&self) -> bool {
        let Some(last) = self.messages.last() else {
            return false;
        };
        matches!(last.role, Role::User | Role::Tool)
            && last.is_complete()
            && self.pending_tool_calls().is_empty()
    }

    /// User and plain assistant turns not yet known to `thread_id`
    pub fn unsynced(&self, thread_id: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.is_complete() && !m.is_synced_to(thread_id))
            .filter(|m| match m.role {
                Role::User => true,
                Role::Assistant => !m.has_tool_calls(),
                Role::System | Role::Tool => false,
            })
            .collect()
    }

    pub fn mark_synced(&mut self, ids: &[String], thread_id: &str) {
        for message in &mut self.messages {
            if ids.contains(&message.id) {
                message.thread_id = Some(thread_id.to_string());
            }
        }
    }

    fn reorder(&mut self) {
        self.messages.sort_by_key(|m| m.created_at);

        let declared: HashSet<String> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
            .collect();

        let (mut attached, base): (Vec<Message>, Vec<Message>) =
            self.messages.drain(..).partition(|m| {
                m.role == Role::Tool
                    && m.tool_call_id
                        .as_ref()
                        .is_some_and(|id| declared.contains(id))
            });

        let mut ordered = Vec::with_capacity(base.len() + attached.len());
        for message in base {
            let call_ids: Vec<String> = if message.role == Role::Assistant {
                message.tool_calls.iter().map(|c| c.id.clone()).collect()
            } else {
                Vec::new()
            };
            ordered.push(message);
            for call_id in call_ids {
                let (matching, rest): (Vec<Message>, Vec<Message>) = attached
                    .into_iter()
                    .partition(|t| t.tool_call_id.as_deref() == Some(call_id.as_str()));
                ordered.extend(matching);
                attached = rest;
            }
        }
        ordered.extend(attached);
        self.messages = ordered;
    }
}

/// Merge the mutable fields of `update` into `existing`
fn merge(existing: &mut Message, update: Message) -> bool {
    let before = existing.clone();
    existing.content = update.content;
    existing.tool_calls = update.tool_calls;
    existing.status = update.status;
    existing.is_error = update.is_error;
    if update.thread_id.is_some() {
        existing.thread_id = update.thread_id;
    }
    if update.tool_call_id.is_some() {
        existing.tool_call_id = update.tool_call_id;
    }
    *existing != before
}

//! At-most-once tool call dispatch

use super::{ToolError, ToolExecutor};
use crate::llm::{LlmError, Message, ToolCall, ToolCallKind, PARALLEL_TOOL_USE};
use crate::store::MessageStore;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Instant;

/// Tracks which tool call ids are executing.
///
/// An id is claimed before its callback starts and released only once its
/// tool message has been appended, so repeated evaluation never runs a call
/// twice.
#[derive(Debug, Default)]
pub struct ToolDispatcher {
    in_flight: HashSet<String>,
}

impl ToolDispatcher {
    /// Claim every pending call that can be resolved locally.
    ///
    /// Calls naming an unregistered tool are claimed only when
    /// `answer_unknown` is set; otherwise they wait for an external output.
    pub fn claim(
        &mut self,
        store: &MessageStore,
        executor: &dyn ToolExecutor,
        answer_unknown: bool,
    ) -> Vec<ToolCall> {
        let mut claimed = Vec::new();
        for call in store.pending_tool_calls() {
            if self.in_flight.contains(&call.id) {
                continue;
            }
            let resolvable =
                call.name == PARALLEL_TOOL_USE || executor.has_tool(&call.name) || answer_unknown;
            if resolvable {
                self.in_flight.insert(call.id.clone());
                claimed.push(call.clone());
            }
        }
        claimed
    }

    pub fn release(&mut self, tool_call_id: &str) -> bool {
        self.in_flight.remove(tool_call_id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

/// Run one tool call and produce its tool message. Never fails: callback
/// errors become an error tool message.
pub async fn execute_call(executor: &dyn ToolExecutor, call: &ToolCall) -> Message {
    let start = Instant::now();
    let result = match call.kind() {
        Ok(ToolCallKind::Single(arguments)) => executor.execute(&call.name, arguments).await,
        Ok(ToolCallKind::ParallelBatch(subcalls)) => {
            let runs = subcalls
                .into_iter()
                .map(|sub| async move { executor.execute(&sub.name, sub.arguments).await });
            let outputs = futures::future::join_all(runs)
                .await
                .into_iter()
                .map(|r| r.unwrap_or_else(|e| json!({ "error": e.to_string() })))
                .collect();
            Ok(Value::Array(outputs))
        }
        Err(e) => Err(ToolError::invalid(&call.name, e.to_string())),
    };

    let duration_ms = start.elapsed().as_millis();
    match result {
        Ok(output) => {
            tracing::info!(tool = %call.name, tool_call_id = %call.id, duration_ms = %duration_ms, "Tool completed");
            Message::tool_result(&call.id, render(output), false)
        }
        Err(e) => {
            let error = LlmError::from(e);
            tracing::warn!(tool = %call.name, tool_call_id = %call.id, duration_ms = %duration_ms, kind = %error.kind, error = %error.message, "Tool failed");
            Message::tool_result(&call.id, error.message, true)
        }
    }
}

fn render(output: Value) -> String {
    match output {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

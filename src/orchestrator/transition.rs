//! Pure transition function
//!
//! Folds one event into the session and returns the effects to perform.
//! State-change broadcasts are left to the runtime, which publishes once
//! guards have been re-evaluated.

use super::event::{Event, StreamSource, TaskResult};
use super::{ActionKind, Effect};
use crate::config::SessionConfig;
use crate::llm::{ErrorKind, LlmError, Message, ThreadRun};
use crate::reconciler::second_precision;
use crate::session::{Session, SessionEvent};
use crate::stream::{StreamAccumulator, StreamEvent};

pub fn apply(session: &mut Session, config: &SessionConfig, event: Event) -> Vec<Effect> {
    match event {
        Event::UserMessage(message) => user_message(session, config, message),
        Event::ToolOutputProvided {
            tool_call_id,
            output,
            is_error,
        } => tool_output(session, &tool_call_id, output, is_error),
        Event::Reset => reset(session, config),
        Event::SetEnabled(enabled) => {
            session.enabled = enabled;
            Vec::new()
        }
        Event::Task { epoch, result } => {
            if epoch != session.epoch {
                tracing::debug!(
                    epoch,
                    current = session.epoch,
                    "Discarding result from before reset"
                );
                return Vec::new();
            }
            task_result(session, result)
        }
    }
}

fn user_message(
    session: &mut Session,
    config: &SessionConfig,
    mut message: Message,
) -> Vec<Effect> {
    if config.mode.is_stateful() {
        message.created_at = second_precision(message.created_at);
    }
    // Local turns never sort before what is already shown
    if let Some(last) = session.store.last() {
        message.created_at = message.created_at.max(last.created_at);
    }
    session.started = true;
    merge(session, vec![message])
}

fn tool_output(
    session: &mut Session,
    tool_call_id: &str,
    output: String,
    is_error: bool,
) -> Vec<Effect> {
    if session.store.tool_output(tool_call_id).is_some() {
        tracing::debug!(tool_call_id, "Tool call already answered");
        return Vec::new();
    }
    let pending = session
        .store
        .pending_tool_calls()
        .iter()
        .any(|call| call.id == tool_call_id);
    if !pending {
        tracing::warn!(tool_call_id, "Output for unknown tool call ignored");
        return Vec::new();
    }
    merge(
        session,
        vec![Message::tool_result(tool_call_id, output, is_error)],
    )
}

fn reset(session: &mut Session, config: &SessionConfig) -> Vec<Effect> {
    let mut effects = vec![Effect::CancelInFlight];
    if let Some(thread_id) = session.thread.thread_id.take() {
        effects.push(Effect::DeleteThread(thread_id));
    }

    session.epoch += 1;
    session.thread.reset();
    session.store.clear();
    session.dispatcher.clear();
    session.stream = None;
    session.error = None;
    session.model_in_flight = false;
    session.starting = false;
    session.started = false;
    tracing::info!(epoch = session.epoch, "Session reset");

    if config.mode.is_stateful() {
        effects.push(Effect::PersistThread(None));
        effects.push(Effect::PersistAssistant(None));
    }
    effects
}

fn task_result(session: &mut Session, result: TaskResult) -> Vec<Effect> {
    match result {
        TaskResult::ThreadCreated(thread_id) => {
            session.thread.thread_created(thread_id.clone());
            vec![
                Effect::PersistThread(Some(thread_id)),
                Effect::PersistAssistant(session.assistant_id.clone()),
            ]
        }
        TaskResult::ThreadLoaded { runs, messages } => {
            let messages = session.thread.loaded(runs, messages);
            merge(session, messages)
        }
        TaskResult::ModelResponse(message) => {
            model_finished(session);
            merge(session, vec![message])
        }
        TaskResult::RunCreated { run, sent } => {
            session.thread.run_started(false);
            run_accepted(session, &sent);
            run_update(session, run)
        }
        TaskResult::RunStreamOpened { sent } => {
            session.thread.run_started(true);
            run_accepted(session, &sent);
            Vec::new()
        }
        TaskResult::Stream { source, event } => stream_event(session, source, event),
        TaskResult::StreamClosed(source) => {
            let leftover = session
                .stream
                .take()
                .map(|mut acc| acc.finish())
                .unwrap_or_default();
            match source {
                StreamSource::Model => model_finished(session),
                StreamSource::Run => session.thread.run_streaming = false,
            }
            merge(session, leftover)
        }
        TaskResult::RunPolled(run) => run_update(session, run),
        TaskResult::PollStopped => {
            session.thread.polling = false;
            Vec::new()
        }
        TaskResult::ToolOutputsSubmitted {
            thread_id,
            run,
            message_ids,
        } => {
            if session.thread.thread_id.as_deref() != Some(thread_id.as_str()) {
                tracing::debug!(thread_id = %thread_id, "Ignoring submission for a replaced thread");
                return Vec::new();
            }
            session.thread.outputs_submitted();
            mark_synced(session, &message_ids);
            run_update(session, run)
        }
        TaskResult::MessagesRefreshed(messages) => {
            session.thread.refreshed();
            merge(session, messages)
        }
        TaskResult::MessagesPushed(messages) => {
            session.thread.pushing = false;
            merge(session, messages)
        }
        TaskResult::ToolFinished(message) => {
            let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
            session.dispatcher.release(&tool_call_id);
            if session.store.tool_output(&tool_call_id).is_some() {
                tracing::debug!(tool_call_id = %tool_call_id, "Dropping duplicate tool output");
                return Vec::new();
            }
            merge(session, vec![message])
        }
        TaskResult::Greeted(message) => {
            session.starting = false;
            session.started = true;
            merge(session, vec![message])
        }
        TaskResult::Failed { action, error } => failed(session, action, error),
    }
}

fn stream_event(session: &mut Session, source: StreamSource, event: StreamEvent) -> Vec<Effect> {
    match event {
        StreamEvent::Error(error) => failed(session, source.action(), error),
        StreamEvent::RunStatus(run) => run_update(session, run),
        StreamEvent::Done => Vec::new(),
        event @ (StreamEvent::MessagePartial(_) | StreamEvent::MessageCompleted { .. }) => {
            let thread_id = session.thread.thread_id.clone();
            let accumulator = session
                .stream
                .get_or_insert_with(|| match (source, thread_id) {
                    (StreamSource::Run, Some(thread_id)) => {
                        StreamAccumulator::for_thread(thread_id)
                    }
                    _ => StreamAccumulator::default(),
                });
            let messages = accumulator.apply(event);
            merge(session, messages)
        }
    }
}

fn model_finished(session: &mut Session) {
    session.model_in_flight = false;
    if session.starting {
        session.starting = false;
        session.started = true;
    }
}

fn run_accepted(session: &mut Session, sent: &[String]) {
    if session.starting {
        session.starting = false;
        session.started = true;
    }
    mark_synced(session, sent);
}

fn mark_synced(session: &mut Session, ids: &[String]) {
    if let Some(thread_id) = session.thread.thread_id.clone() {
        session.store.mark_synced(ids, &thread_id);
    }
}

fn run_update(session: &mut Session, run: ThreadRun) -> Vec<Effect> {
    match session.thread.run_updated(run) {
        Ok(Some(message)) => merge(session, vec![message]),
        Ok(None) => Vec::new(),
        Err(error) => store_error(session, error),
    }
}

fn failed(session: &mut Session, action: ActionKind, error: LlmError) -> Vec<Effect> {
    clear_in_flight(session, action);
    match error.kind {
        ErrorKind::Cancelled => {
            tracing::debug!(action = action.as_str(), "Action cancelled");
            Vec::new()
        }
        ErrorKind::ThreadDesync => {
            tracing::warn!(action = action.as_str(), error = %error.message, "Remote thread lost");
            session.stream = None;
            let mut effects = vec![Effect::PersistThread(None)];
            if let Err(error) = session.thread.desync() {
                effects.extend(store_error(session, error));
            }
            effects
        }
        _ => {
            tracing::error!(action = action.as_str(), kind = %error.kind, error = %error.message, "Action failed");
            store_error(session, error)
        }
    }
}

fn store_error(session: &mut Session, error: LlmError) -> Vec<Effect> {
    session.error = Some(error.clone());
    vec![Effect::Broadcast(SessionEvent::Error(error))]
}

fn clear_in_flight(session: &mut Session, action: ActionKind) {
    let thread = &mut session.thread;
    match action {
        ActionKind::CreateThread => thread.creating_thread = false,
        ActionKind::LoadThread => thread.loading = false,
        ActionKind::SubmitToolOutputs => thread.submitting = false,
        ActionKind::PollRun => thread.polling = false,
        ActionKind::RefreshMessages => thread.refreshing = false,
        ActionKind::PushMessages => thread.pushing = false,
        ActionKind::CreateRun => {
            thread.creating_run = false;
            thread.run_streaming = false;
            session.starting = false;
            session.stream = None;
        }
        ActionKind::RequestModel => {
            session.model_in_flight = false;
            session.starting = false;
            session.stream = None;
        }
        ActionKind::Greet => session.starting = false,
        ActionKind::ExecuteTool => {}
    }
}

/// Merge into the store and broadcast every message that changed
fn merge(session: &mut Session, messages: Vec<Message>) -> Vec<Effect> {
    let mut effects = Vec::new();
    for message in messages {
        let id = message.id.clone();
        if session.store.append(message) {
            if let Some(stored) = session.store.find(&id) {
                effects.push(Effect::Broadcast(SessionEvent::Message(stored.clone())));
            }
        }
    }
    effects
}

//! Ordered guard evaluation
//!
//! Guards are re-evaluated after every change. A step that fires marks its
//! in-progress flag before returning, so evaluating twice never starts the
//! same work twice.

use super::Action;
use crate::config::{Mode, SessionConfig, StartBehavior};
use crate::llm::{LlmRequest, Message, RunRequest, RunTarget};
use crate::reconciler::second_precision;
use crate::session::Session;
use crate::tools::ToolExecutor;

/// Decide which actions to start now
pub fn converge(
    session: &mut Session,
    config: &SessionConfig,
    tools: &dyn ToolExecutor,
) -> Vec<Action> {
    let mut actions = Vec::new();
    // A stored error blocks every step until reset
    if !session.enabled || session.error.is_some() {
        return actions;
    }

    if config.mode.is_stateful() {
        thread_actions(session, &mut actions);
    }

    for call in session
        .dispatcher
        .claim(&session.store, tools, config.answer_unknown_tools)
    {
        actions.push(Action::ExecuteTool(call));
    }

    match &config.mode {
        Mode::Stateless => {
            if !session.model_in_flight && session.store.needs_reply() {
                session.model_in_flight = true;
                actions.push(Action::RequestModel(model_request(session, config, tools)));
            }
        }
        Mode::Stateful { target } => run_actions(session, config, target, tools, &mut actions),
    }

    start_actions(session, config, tools, &mut actions);
    actions
}

/// Thread creation, load, submission, polling and refresh
fn thread_actions(session: &mut Session, actions: &mut Vec<Action>) {
    let thread = &mut session.thread;

    if thread.wants_thread() {
        thread.creating_thread = true;
        actions.push(Action::CreateThread);
    }

    if let Some(thread_id) = thread.wants_load().map(str::to_string) {
        thread.loading = true;
        actions.push(Action::LoadThread { thread_id });
    }

    if let (Some(submission), Some(thread_id)) =
        (thread.submission(&session.store), thread.thread_id.clone())
    {
        thread.submitting = true;
        actions.push(Action::SubmitToolOutputs {
            thread_id,
            submission,
        });
    }

    if let Some((thread_id, run_id)) = thread
        .wants_poll()
        .map(|(t, r)| (t.to_string(), r.to_string()))
    {
        thread.polling = true;
        actions.push(Action::PollRun { thread_id, run_id });
    }

    if let Some(thread_id) = thread.wants_refresh().map(str::to_string) {
        thread.refreshing = true;
        actions.push(Action::RefreshMessages { thread_id });
    }
}

/// New input starts a run; otherwise idle local turns are pushed to the thread
fn run_actions(
    session: &mut Session,
    config: &SessionConfig,
    target: &RunTarget,
    tools: &dyn ToolExecutor,
    actions: &mut Vec<Action>,
) {
    let Some(thread_id) = session.thread.idle_thread().map(str::to_string) else {
        return;
    };

    if let Some(pending) = session.thread.wants_run(&session.store) {
        let messages: Vec<Message> = pending.into_iter().cloned().collect();
        let sent = messages.iter().map(|m| m.id.clone()).collect();
        session.thread.creating_run = true;
        actions.push(Action::CreateRun {
            thread_id,
            request: run_request(config, target, tools, messages),
            sent,
        });
        return;
    }

    let messages: Vec<Message> = session
        .thread
        .wants_push(&session.store)
        .into_iter()
        .cloned()
        .collect();
    if !messages.is_empty() {
        session.thread.pushing = true;
        actions.push(Action::PushMessages {
            thread_id,
            messages,
        });
    }
}

/// Start hook for a session with no history
fn start_actions(
    session: &mut Session,
    config: &SessionConfig,
    tools: &dyn ToolExecutor,
    actions: &mut Vec<Action>,
) {
    if session.started || session.starting {
        return;
    }
    if !session.store.is_empty() {
        session.started = true;
        return;
    }

    match (&config.agent.start, &config.mode) {
        (StartBehavior::None, _) => session.started = true,
        (StartBehavior::Greeting(text), mode) => {
            let mut greeting = Message::assistant(text.as_str());
            if mode.is_stateful() {
                greeting.created_at = second_precision(greeting.created_at);
            }
            session.starting = true;
            actions.push(Action::Greet(greeting));
        }
        (StartBehavior::Model, Mode::Stateless) => {
            if !session.model_in_flight {
                session.starting = true;
                session.model_in_flight = true;
                actions.push(Action::RequestModel(model_request(session, config, tools)));
            }
        }
        (StartBehavior::Model, Mode::Stateful { target }) => {
            if let Some(thread_id) = session.thread.idle_thread().map(str::to_string) {
                session.starting = true;
                session.thread.creating_run = true;
                actions.push(Action::CreateRun {
                    thread_id,
                    request: run_request(config, target, tools, Vec::new()),
                    sent: Vec::new(),
                });
            }
        }
    }
}

/// Full-history request for the stateless gateway
pub(crate) fn model_request(
    session: &Session,
    config: &SessionConfig,
    tools: &dyn ToolExecutor,
) -> LlmRequest {
    let agent = &config.agent;
    LlmRequest {
        model: agent.model.clone(),
        messages: session
            .store
            .get()
            .iter()
            .filter(|m| m.is_complete())
            .cloned()
            .collect(),
        tools: tools.definitions(),
        instructions: agent.instructions.clone(),
        extra_instructions: agent.extra_instructions.clone(),
        temperature: agent.temperature,
        max_tokens: agent.max_tokens,
    }
}

fn run_request(
    config: &SessionConfig,
    target: &RunTarget,
    tools: &dyn ToolExecutor,
    messages: Vec<Message>,
) -> RunRequest {
    let agent = &config.agent;
    RunRequest {
        target: target.clone(),
        model: Some(agent.model.clone()),
        instructions: agent.instructions.clone(),
        additional_instructions: agent.extra_instructions.clone(),
        additional_messages: messages,
        tools: tools.definitions(),
        temperature: agent.temperature,
    }
}

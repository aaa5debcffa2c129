//! Property-based tests for the orchestrator
//!
//! Drive `converge`/`apply` with arbitrary interleavings of task completions
//! and check the dispatch and run invariants.

use super::*;
use crate::config::{Mode, SessionConfig};
use crate::llm::{Message, Role, RunStatus, RunTarget, ThreadRun, ToolCall};
use crate::session::Session;
use crate::tools::ToolRegistry;
use proptest::prelude::*;
use serde_json::json;
use std::collections::{HashMap, VecDeque};

// ============================================================================
// Test Helpers
// ============================================================================

fn registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    for name in ["getWeather", "getTime"] {
        registry.register_fn(name, name, json!({"type": "object"}), |_| async {
            Ok(json!("ok"))
        });
    }
    registry
}

struct Harness {
    session: Session,
    config: SessionConfig,
    tools: ToolRegistry,
    pending: VecDeque<Action>,
    executed: HashMap<String, usize>,
    live_runs: usize,
    run_seq: u32,
}

impl Harness {
    fn new(config: SessionConfig, session: Session) -> Self {
        Self {
            session,
            config,
            tools: registry(),
            pending: VecDeque::new(),
            executed: HashMap::new(),
            live_runs: 0,
            run_seq: 0,
        }
    }

    fn converge(&mut self) {
        for action in converge(&mut self.session, &self.config, &self.tools) {
            match &action {
                Action::ExecuteTool(call) => {
                    *self.executed.entry(call.id.clone()).or_default() += 1
                }
                Action::CreateRun { .. } => self.live_runs += 1,
                _ => {}
            }
            self.pending.push_back(action);
        }
    }

    fn feed(&mut self, result: TaskResult) {
        let event = Event::task(self.session.epoch, result);
        apply(&mut self.session, &self.config, event);
    }

    fn finish_tool(&mut self, pick: usize) {
        let tools: Vec<usize> = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(a, Action::ExecuteTool(_)))
            .map(|(i, _)| i)
            .collect();
        if tools.is_empty() {
            return;
        }
        let index = tools[pick % tools.len()];
        if let Some(Action::ExecuteTool(call)) = self.pending.remove(index) {
            self.feed(TaskResult::ToolFinished(Message::tool_result(
                &call.id, "done", false,
            )));
        }
    }

    /// Complete the oldest remote action, reporting `status` for runs
    fn resolve(&mut self, status: RunStatus) {
        let Some(action) = self.pending.pop_front() else {
            return;
        };
        match action {
            Action::CreateRun { sent, .. } => {
                self.run_seq += 1;
                let run = ThreadRun::new(format!("run_{}", self.run_seq), status);
                if !status.is_active() {
                    self.live_runs -= 1;
                }
                self.feed(TaskResult::RunCreated { run, sent });
            }
            Action::PollRun { run_id, .. } => {
                self.feed(TaskResult::RunPolled(ThreadRun::new(
                    run_id.clone(),
                    status,
                )));
                if status.is_pollable() {
                    self.pending.push_back(Action::PollRun {
                        thread_id: "t1".to_string(),
                        run_id,
                    });
                } else {
                    self.live_runs -= 1;
                    self.feed(TaskResult::PollStopped);
                }
            }
            Action::RefreshMessages { .. } => {
                let reply = Message::assistant("reply").with_thread_id("t1");
                self.feed(TaskResult::MessagesRefreshed(vec![reply]));
            }
            Action::PushMessages { messages, .. } => {
                let pushed = messages
                    .into_iter()
                    .map(|m| m.with_thread_id("t1"))
                    .collect();
                self.feed(TaskResult::MessagesPushed(pushed));
            }
            other => self.pending.push_back(other),
        }
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

#[derive(Debug, Clone)]
enum ToolOp {
    Converge,
    Finish(usize),
    Provide(usize),
}

fn arb_tool_op() -> impl Strategy<Value = ToolOp> {
    prop_oneof![
        3 => Just(ToolOp::Converge),
        2 => any::<usize>().prop_map(ToolOp::Finish),
        1 => any::<usize>().prop_map(ToolOp::Provide),
    ]
}

fn arb_tool_calls() -> impl Strategy<Value = Vec<ToolCall>> {
    prop::collection::vec(
        prop_oneof![Just("getWeather"), Just("getTime"), Just("launchRocket")],
        1..6,
    )
    .prop_map(|names| {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ToolCall::new(format!("call_{i}"), name, "{}"))
            .collect()
    })
}

#[derive(Debug, Clone)]
enum RunOp {
    User,
    Converge,
    Resolve(RunStatus),
}

fn arb_run_status() -> impl Strategy<Value = RunStatus> {
    prop_oneof![
        Just(RunStatus::Queued),
        Just(RunStatus::InProgress),
        Just(RunStatus::Completed),
    ]
}

fn arb_run_op() -> impl Strategy<Value = RunOp> {
    prop_oneof![
        1 => Just(RunOp::User),
        3 => Just(RunOp::Converge),
        3 => arb_run_status().prop_map(RunOp::Resolve),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_each_tool_call_runs_at_most_once(
        calls in arb_tool_calls(),
        ops in prop::collection::vec(arb_tool_op(), 0..40),
    ) {
        let config = SessionConfig::default();
        let mut session = Session::new(&config, None, None);
        session.store.append(Message::user("go"));
        session.store.append(Message::assistant("").with_tool_calls(calls.clone()));
        let mut harness = Harness::new(config, session);

        for op in ops {
            match op {
                ToolOp::Converge => harness.converge(),
                ToolOp::Finish(pick) => harness.finish_tool(pick),
                ToolOp::Provide(pick) => {
                    let id = calls[pick % calls.len()].id.clone();
                    apply(&mut harness.session, &harness.config, Event::ToolOutputProvided {
                        tool_call_id: id,
                        output: "external".to_string(),
                        is_error: false,
                    });
                }
            }
        }

        // Drain
        loop {
            harness.converge();
            if !harness.pending.iter().any(|a| matches!(a, Action::ExecuteTool(_))) {
                break;
            }
            harness.finish_tool(0);
        }

        for (id, count) in &harness.executed {
            prop_assert!(*count <= 1, "{id} executed {count} times");
        }
        for call in &calls {
            let outputs = harness
                .session
                .store
                .get()
                .iter()
                .filter(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call.id.as_str()))
                .count();
            prop_assert_eq!(outputs, 1);
        }
        prop_assert_eq!(harness.session.dispatcher.in_flight(), 0);
    }

    #[test]
    fn prop_at_most_one_active_run(ops in prop::collection::vec(arb_run_op(), 0..60)) {
        let config = SessionConfig::default().with_mode(Mode::Stateful {
            target: RunTarget::Assistant("asst_1".to_string()),
        });
        let mut session = Session::new(&config, Some("t1".to_string()), Some("asst_1".to_string()));
        session.thread.loaded(Vec::new(), Vec::new());
        let mut harness = Harness::new(config, session);

        for op in ops {
            match op {
                RunOp::User => {
                    apply(&mut harness.session, &harness.config, Event::UserMessage(Message::user("hi")));
                }
                RunOp::Converge => harness.converge(),
                RunOp::Resolve(status) => harness.resolve(status),
            }
            prop_assert!(harness.live_runs <= 1, "{} runs live", harness.live_runs);
            prop_assert!(harness.session.error.is_none());
        }
    }
}

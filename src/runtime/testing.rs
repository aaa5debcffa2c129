//! Mock gateways and end-to-end session scenarios
//!
//! These mocks enable runtime testing without real I/O.

use crate::llm::{
    CompletionGateway, EventStream, LlmError, LlmRequest, Message, RunRequest, RunStatus,
    ThreadGateway, ThreadRun, ToolOutput,
};
use crate::reconciler::second_precision;
use crate::stream::{decode_stream, SseDecoder, StreamEvent};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock Completion Gateway
// ============================================================================

/// Returns queued responses in order and records every request
#[derive(Default)]
pub struct MockCompletionGateway {
    responses: Mutex<VecDeque<Result<Message, LlmError>>>,
    streams: Mutex<VecDeque<Vec<Result<StreamEvent, LlmError>>>>,
    delay: Duration,
    requests: Mutex<Vec<LlmRequest>>,
    pub request_started: Arc<Notify>,
}

impl MockCompletionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every non-streaming call waits `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn queue_response(&self, message: Message) {
        self.responses.lock().unwrap().push_back(Ok(message));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_stream(&self, events: Vec<StreamEvent>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(events.into_iter().map(Ok).collect());
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionGateway for MockCompletionGateway {
    async fn run(&self, request: &LlmRequest) -> Result<Message, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    async fn run_stream(&self, request: &LlmRequest) -> Result<EventStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::network("No mock stream queued"))?;
        Ok(futures::stream::iter(events).boxed())
    }
}

// ============================================================================
// Mock Thread Gateway
// ============================================================================

#[derive(Default)]
struct Remote {
    created: u32,
    threads: HashMap<String, Vec<Message>>,
    runs: HashMap<String, Vec<ThreadRun>>,
    run_responses: VecDeque<ThreadRun>,
    /// Initial run record and SSE body of each streamed run
    run_streams: VecDeque<(ThreadRun, String)>,
    run_error: Option<LlmError>,
    poll_responses: VecDeque<ThreadRun>,
    submit_responses: VecDeque<ThreadRun>,
    /// Assistant messages added to the thread when a run succeeds
    replies: VecDeque<Message>,
    run_requests: Vec<RunRequest>,
    submissions: Vec<(String, Vec<ToolOutput>)>,
    deleted: Vec<String>,
}

impl Remote {
    fn thread(&mut self, thread_id: &str) -> Result<&mut Vec<Message>, LlmError> {
        self.threads
            .get_mut(thread_id)
            .ok_or_else(|| LlmError::desync(format!("No thread found with id '{thread_id}'")))
    }

    fn record_run(&mut self, thread_id: &str, mut run: ThreadRun) -> ThreadRun {
        run.thread_id = Some(thread_id.to_string());
        if run.status.is_success() {
            let replies: Vec<Message> = self.replies.drain(..).collect();
            if let Some(messages) = self.threads.get_mut(thread_id) {
                for reply in replies {
                    messages.push(
                        reply
                            .with_thread_id(thread_id)
                            .with_created_at(second_precision(Utc::now())),
                    );
                }
            }
        }
        let runs = self.runs.entry(thread_id.to_string()).or_default();
        runs.retain(|r| r.id != run.id);
        runs.insert(0, run.clone());
        run
    }
}

/// In-memory remote threads with scripted run statuses
#[derive(Default)]
pub struct MockThreadGateway {
    remote: Mutex<Remote>,
}

impl MockThreadGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by the next `create_run`
    pub fn queue_run(&self, run: ThreadRun) {
        self.remote.lock().unwrap().run_responses.push_back(run);
    }

    /// Script the next `create_run_stream`. The body is delivered in one
    /// chunk and the connection then stays open, as a keep-alive server does.
    pub fn queue_run_stream(&self, run: ThreadRun, sse: impl Into<String>) {
        self.remote
            .lock()
            .unwrap()
            .run_streams
            .push_back((run, sse.into()));
    }

    /// Every run creation fails with `error`
    pub fn fail_runs(&self, error: LlmError) {
        self.remote.lock().unwrap().run_error = Some(error);
    }

    pub fn threads_created(&self) -> u32 {
        self.remote.lock().unwrap().created
    }

    /// Status returned by the next `get_run`
    pub fn queue_poll(&self, run: ThreadRun) {
        self.remote.lock().unwrap().poll_responses.push_back(run);
    }

    pub fn queue_submit(&self, run: ThreadRun) {
        self.remote.lock().unwrap().submit_responses.push_back(run);
    }

    pub fn queue_reply(&self, text: &str) {
        self.remote
            .lock()
            .unwrap()
            .replies
            .push_back(Message::assistant(text));
    }

    pub fn thread_messages(&self, thread_id: &str) -> Vec<Message> {
        self.remote
            .lock()
            .unwrap()
            .threads
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn run_requests(&self) -> Vec<RunRequest> {
        self.remote.lock().unwrap().run_requests.clone()
    }

    pub fn submissions(&self) -> Vec<(String, Vec<ToolOutput>)> {
        self.remote.lock().unwrap().submissions.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.remote.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ThreadGateway for MockThreadGateway {
    async fn create_thread(&self) -> Result<String, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        remote.created += 1;
        let thread_id = format!("t{}", remote.created);
        remote.threads.insert(thread_id.clone(), Vec::new());
        Ok(thread_id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), LlmError> {
        let mut remote = self.remote.lock().unwrap();
        remote.threads.remove(thread_id);
        remote.deleted.push(thread_id.to_string());
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<ThreadRun, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        if let Some(error) = remote.run_error.clone() {
            return Err(error);
        }
        let messages = remote.thread(thread_id)?;
        for message in &request.additional_messages {
            messages.push(message.clone().with_thread_id(thread_id));
        }
        remote.run_requests.push(request.clone());
        let sequence = remote.run_requests.len();
        let run = remote
            .run_responses
            .pop_front()
            .unwrap_or_else(|| ThreadRun::new(format!("run_{sequence}"), RunStatus::Queued));
        Ok(remote.record_run(thread_id, run))
    }

    async fn create_run_stream(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<EventStream, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        if let Some(error) = remote.run_error.clone() {
            return Err(error);
        }
        let messages = remote.thread(thread_id)?;
        for message in &request.additional_messages {
            messages.push(message.clone().with_thread_id(thread_id));
        }
        remote.run_requests.push(request.clone());
        let (run, sse) = remote
            .run_streams
            .pop_front()
            .ok_or_else(|| LlmError::network("No mock run stream queued"))?;
        remote.record_run(thread_id, run);

        let body = futures::stream::iter(vec![Ok::<_, LlmError>(sse.into_bytes())])
            .chain(futures::stream::pending());
        Ok(decode_stream(body, SseDecoder::LF))
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        remote.thread(thread_id)?;
        let run = remote
            .poll_responses
            .pop_front()
            .unwrap_or_else(|| ThreadRun::new(run_id, RunStatus::Completed));
        Ok(remote.record_run(thread_id, run))
    }

    async fn get_runs(&self, thread_id: &str) -> Result<Vec<ThreadRun>, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        remote.thread(thread_id)?;
        Ok(remote.runs.get(thread_id).cloned().unwrap_or_default())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        Ok(remote.thread(thread_id)?.clone())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ThreadRun, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        remote.thread(thread_id)?;
        remote
            .submissions
            .push((run_id.to_string(), outputs.to_vec()));
        let run = remote
            .submit_responses
            .pop_front()
            .unwrap_or_else(|| ThreadRun::new(run_id, RunStatus::Queued));
        Ok(remote.record_run(thread_id, run))
    }

    async fn create_thread_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<Message, LlmError> {
        let mut remote = self.remote.lock().unwrap();
        let stored = message.clone().with_thread_id(thread_id);
        remote.thread(thread_id)?.push(stored.clone());
        Ok(stored)
    }
}

// ============================================================================
// Session Scenarios
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, SessionConfig, StartBehavior};
    use crate::llm::{ErrorKind, Role, RunTarget, ToolCall};
    use crate::prefs::{MemoryPreferences, PreferenceStore, ASSISTANT_ID_KEY, THREAD_ID_KEY};
    use crate::reconciler::{ThreadPhase, MAX_DESYNCS};
    use crate::runtime::{RuntimeError, SessionHandle, SessionRuntime};
    use crate::session::{SessionEvent, SessionSnapshot};
    use crate::stream::MessageDelta;
    use crate::tools::ToolRegistry;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(3);

    fn weather_tools() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register_fn(
            "getWeather",
            "Current weather for a location",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
            |args| async move {
                let location = args["location"].as_str().unwrap_or("nowhere").to_string();
                Ok(json!(format!("Sunny, 24C in {location}")))
            },
        );
        Arc::new(registry)
    }

    fn stateful() -> SessionConfig {
        SessionConfig::default()
            .with_mode(Mode::Stateful {
                target: RunTarget::Assistant("asst_1".to_string()),
            })
            .with_poll_interval(Duration::from_millis(10))
    }

    fn start(
        config: SessionConfig,
        completions: &Arc<MockCompletionGateway>,
        threads: Option<&Arc<MockThreadGateway>>,
        prefs: &Arc<MemoryPreferences>,
    ) -> SessionHandle {
        let mut runtime =
            SessionRuntime::new(config, completions.clone(), weather_tools(), prefs.clone());
        if let Some(threads) = threads {
            runtime = runtime.with_threads(threads.clone());
        }
        runtime.spawn().unwrap()
    }

    /// Assistants-style SSE body ending with the done marker
    fn sse(events: &[(&str, serde_json::Value)]) -> String {
        let mut body: String = events
            .iter()
            .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
            .collect();
        body.push_str("event: done\ndata: [DONE]\n\n");
        body
    }

    fn replied(text: &'static str) -> impl Fn(&SessionSnapshot) -> bool {
        move |s| {
            !s.state.busy
                && s.last_message()
                    .is_some_and(|m| m.role == Role::Assistant && m.content.text() == text)
        }
    }

    #[tokio::test]
    async fn test_greeting_without_model_call() {
        let completions = Arc::new(MockCompletionGateway::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let config = SessionConfig::default().with_start(StartBehavior::Greeting(
            "Hello! Ask me about the weather.".into(),
        ));
        let handle = start(config, &completions, None, &prefs);

        let snapshot = handle
            .wait_until(replied("Hello! Ask me about the weather."), WAIT)
            .await
            .unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert!(completions.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_stateless_tool_round_trip() {
        let completions = Arc::new(MockCompletionGateway::new());
        completions.queue_response(Message::assistant("").with_tool_calls(vec![ToolCall::new(
            "call_1",
            "getWeather",
            r#"{"location":"Darwin"}"#,
        )]));
        completions.queue_response(Message::assistant("It's sunny in Darwin."));
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(SessionConfig::default(), &completions, None, &prefs);

        handle.send_message("Weather in Darwin?").await.unwrap();
        let snapshot = handle
            .wait_until(replied("It's sunny in Darwin."), WAIT)
            .await
            .unwrap();

        let roles: Vec<Role> = snapshot.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(snapshot.messages[2].content.text(), "Sunny, 24C in Darwin");

        let requests = completions.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_stateful_requires_action_round_trip() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        threads.queue_run(ThreadRun::new("run_1", RunStatus::Queued));
        threads.queue_poll(
            ThreadRun::new("run_1", RunStatus::InProgress).requiring(vec![ToolCall::new(
                "call_1",
                "getWeather",
                r#"{"location":"Perth"}"#,
            )]),
        );
        threads.queue_submit(ThreadRun::new("run_1", RunStatus::Queued));
        threads.queue_poll(ThreadRun::new("run_1", RunStatus::Completed));
        threads.queue_reply("Perth is sunny.");
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(stateful(), &completions, Some(&threads), &prefs);

        handle
            .wait_until(|s| s.state.phase == ThreadPhase::Synced, WAIT)
            .await
            .unwrap();
        handle.send_message("Weather in Perth?").await.unwrap();
        let snapshot = handle
            .wait_until(replied("Perth is sunny."), WAIT)
            .await
            .unwrap();

        let roles: Vec<Role> = snapshot.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(snapshot.messages[1].id, "run_1:call_1");
        assert_eq!(snapshot.state.phase, ThreadPhase::Synced);

        let submissions = threads.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0, "run_1");
        assert_eq!(submissions[0].1[0].output, "Sunny, 24C in Perth");

        let runs = threads.run_requests();
        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0].additional_messages[0].content.text(),
            "Weather in Perth?"
        );

        assert_eq!(prefs.get(THREAD_ID_KEY).unwrap().as_deref(), Some("t1"));
        assert_eq!(
            prefs.get(ASSISTANT_ID_KEY).unwrap().as_deref(),
            Some("asst_1")
        );
        assert!(completions.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_lost_thread_is_recreated() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set(THREAD_ID_KEY, "t_gone").unwrap();
        prefs.set(ASSISTANT_ID_KEY, "asst_1").unwrap();
        let handle = start(stateful(), &completions, Some(&threads), &prefs);

        let snapshot = handle
            .wait_until(
                |s| {
                    s.state.phase == ThreadPhase::Synced
                        && s.state.thread_id.as_deref() == Some("t1")
                },
                WAIT,
            )
            .await
            .unwrap();
        assert!(snapshot.error.is_none());
        assert_eq!(prefs.get(THREAD_ID_KEY).unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_until_reset() {
        let completions = Arc::new(MockCompletionGateway::new());
        completions.queue_error(
            LlmError::rate_limited("Rate limit exceeded").with_retry_after(Duration::from_secs(7)),
        );
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(SessionConfig::default(), &completions, None, &prefs);
        let mut events = handle.subscribe();

        handle.send_message("hi").await.unwrap();
        let snapshot = handle
            .wait_until(|s| s.error.is_some() && !s.state.busy, WAIT)
            .await
            .unwrap();
        assert_eq!(snapshot.state.error, Some(ErrorKind::RateLimited));
        assert_eq!(
            snapshot.error.unwrap().retry_after,
            Some(Duration::from_secs(7))
        );

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |=
                matches!(event, SessionEvent::Error(e) if e.kind == ErrorKind::RateLimited);
        }
        assert!(saw_error);

        // Blocked: new input is stored but not answered
        handle.send_message("still there?").await.unwrap();
        handle
            .wait_until(|s| s.messages.len() == 2, WAIT)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(completions.recorded_requests().len(), 1);

        handle.reset().await.unwrap();
        handle
            .wait_until(|s| s.messages.is_empty() && s.error.is_none(), WAIT)
            .await
            .unwrap();

        completions.queue_response(Message::assistant("Back again."));
        handle.send_message("hello").await.unwrap();
        handle
            .wait_until(replied("Back again."), WAIT)
            .await
            .unwrap();
        assert_eq!(completions.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_reply() {
        let completions = Arc::new(MockCompletionGateway::with_delay(Duration::from_millis(
            200,
        )));
        completions.queue_response(Message::assistant("Too late"));
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(SessionConfig::default(), &completions, None, &prefs);

        handle.send_message("hi").await.unwrap();
        tokio::time::timeout(WAIT, completions.request_started.notified())
            .await
            .unwrap();
        handle.reset().await.unwrap();
        handle
            .wait_until(|s| s.messages.is_empty() && !s.state.busy, WAIT)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_streamed_reply_is_progressive() {
        let completions = Arc::new(MockCompletionGateway::new());
        let delta = |text: &str| {
            StreamEvent::MessagePartial(MessageDelta {
                id: "chatcmpl-1".to_string(),
                role: Some(Role::Assistant),
                content: Some(text.to_string()),
                ..MessageDelta::default()
            })
        };
        completions.queue_stream(vec![
            delta("Hel"),
            delta("lo"),
            StreamEvent::MessageCompleted {
                id: "chatcmpl-1".to_string(),
                message: None,
            },
            StreamEvent::Done,
        ]);
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(
            SessionConfig::default().with_streaming(true),
            &completions,
            None,
            &prefs,
        );
        let mut events = handle.subscribe();

        handle.send_message("hi").await.unwrap();
        handle.wait_until(replied("Hello"), WAIT).await.unwrap();

        let mut partial = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Message(m) = event {
                partial |= m.role == Role::Assistant && !m.is_complete();
            }
        }
        assert!(partial);
    }

    #[tokio::test]
    async fn test_external_tool_output() {
        let completions = Arc::new(MockCompletionGateway::new());
        completions.queue_response(
            Message::assistant("").with_tool_calls(vec![ToolCall::new("call_1", "askUser", "{}")]),
        );
        completions.queue_response(Message::assistant("Blue it is."));
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(
            SessionConfig::default().with_answer_unknown_tools(false),
            &completions,
            None,
            &prefs,
        );

        handle.send_message("Pick a colour").await.unwrap();
        handle
            .wait_until(
                |s| s.last_message().is_some_and(Message::has_tool_calls) && !s.state.busy,
                WAIT,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(completions.recorded_requests().len(), 1);

        handle
            .submit_tool_output("call_1", "blue", false)
            .await
            .unwrap();
        handle
            .wait_until(replied("Blue it is."), WAIT)
            .await
            .unwrap();
        let requests = completions.recorded_requests();
        assert_eq!(requests[1].messages[2].content.text(), "blue");
    }

    #[tokio::test]
    async fn test_stateful_greeting_is_pushed() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let config = stateful().with_start(StartBehavior::Greeting("G'day!".into()));
        let handle = start(config, &completions, Some(&threads), &prefs);

        let snapshot = handle
            .wait_until(
                |s| s.messages.first().is_some_and(|m| m.is_synced_to("t1")) && !s.state.busy,
                WAIT,
            )
            .await
            .unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        let remote = threads.thread_messages("t1");
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].content.text(), "G'day!");
        assert!(threads.run_requests().is_empty());
    }

    #[tokio::test]
    async fn test_reset_deletes_remote_thread() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(stateful(), &completions, Some(&threads), &prefs);

        handle
            .wait_until(|s| s.state.phase == ThreadPhase::Synced, WAIT)
            .await
            .unwrap();
        handle.reset().await.unwrap();
        handle
            .wait_until(|s| s.state.thread_id.as_deref() == Some("t2"), WAIT)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(threads.deleted(), vec!["t1".to_string()]);
        assert_eq!(prefs.get(THREAD_ID_KEY).unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_stateful_without_thread_gateway() {
        let completions = Arc::new(MockCompletionGateway::new());
        let runtime = SessionRuntime::new(
            stateful(),
            completions,
            weather_tools(),
            Arc::new(MemoryPreferences::new()),
        );
        assert_eq!(
            runtime.spawn().err(),
            Some(RuntimeError::MissingThreadGateway)
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_runtime() {
        let completions = Arc::new(MockCompletionGateway::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(SessionConfig::default(), &completions, None, &prefs);
        handle.shutdown();

        let mut stopped = false;
        for _ in 0..50 {
            if handle.send_message("anyone?").await == Err(RuntimeError::Stopped) {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_streamed_run_requires_action_round_trip() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        threads.queue_run_stream(
            ThreadRun::new("run_1", RunStatus::Queued),
            sse(&[
                (
                    "thread.run.created",
                    json!({"id": "run_1", "object": "thread.run", "thread_id": "t1", "status": "queued"}),
                ),
                (
                    "thread.run.requires_action",
                    json!({
                        "id": "run_1",
                        "object": "thread.run",
                        "thread_id": "t1",
                        "status": "requires_action",
                        "required_action": {
                            "type": "submit_tool_outputs",
                            "submit_tool_outputs": {"tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {"name": "getWeather", "arguments": "{\"location\":\"Hobart\"}"}
                            }]}
                        }
                    }),
                ),
            ]),
        );
        threads.queue_submit(ThreadRun::new("run_1", RunStatus::Queued));
        threads.queue_poll(ThreadRun::new("run_1", RunStatus::Completed));
        threads.queue_reply("Hobart is mild.");
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(
            stateful().with_streaming(true),
            &completions,
            Some(&threads),
            &prefs,
        );

        handle
            .wait_until(|s| s.state.phase == ThreadPhase::Synced, WAIT)
            .await
            .unwrap();
        handle.send_message("Weather in Hobart?").await.unwrap();
        let snapshot = handle
            .wait_until(replied("Hobart is mild."), WAIT)
            .await
            .unwrap();

        let roles: Vec<Role> = snapshot.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(snapshot.messages[1].id, "run_1:call_1");
        assert_eq!(snapshot.state.phase, ThreadPhase::Synced);
        assert!(snapshot.error.is_none());

        let submissions = threads.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].1[0].tool_call_id, "call_1");
        assert_eq!(submissions[0].1[0].output, "Sunny, 24C in Hobart");
        assert_eq!(threads.run_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_streamed_run_reply_is_progressive() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        let text = |value: &str| json!([{"index": 0, "type": "text", "text": {"value": value}}]);
        threads.queue_run_stream(
            ThreadRun::new("run_1", RunStatus::Queued),
            sse(&[
                (
                    "thread.run.in_progress",
                    json!({"id": "run_1", "object": "thread.run", "thread_id": "t1", "status": "in_progress"}),
                ),
                (
                    "thread.message.created",
                    json!({"id": "msg_1", "object": "thread.message", "thread_id": "t1",
                           "role": "assistant", "status": "in_progress", "content": []}),
                ),
                (
                    "thread.message.delta",
                    json!({"id": "msg_1", "object": "thread.message.delta", "delta": {"content": text("Mild ")}}),
                ),
                (
                    "thread.message.delta",
                    json!({"id": "msg_1", "object": "thread.message.delta", "delta": {"content": text("in Hobart.")}}),
                ),
                (
                    "thread.message.completed",
                    json!({"id": "msg_1", "object": "thread.message", "thread_id": "t1",
                           "role": "assistant", "status": "completed",
                           "content": [{"type": "text", "text": {"value": "Mild in Hobart.", "annotations": []}}]}),
                ),
                (
                    "thread.run.completed",
                    json!({"id": "run_1", "object": "thread.run", "thread_id": "t1", "status": "completed"}),
                ),
            ]),
        );
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(
            stateful().with_streaming(true),
            &completions,
            Some(&threads),
            &prefs,
        );
        let mut events = handle.subscribe();

        handle
            .wait_until(|s| s.state.phase == ThreadPhase::Synced, WAIT)
            .await
            .unwrap();
        handle.send_message("Weather in Hobart?").await.unwrap();
        let snapshot = handle
            .wait_until(replied("Mild in Hobart."), WAIT)
            .await
            .unwrap();

        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].id, "msg_1");
        assert!(snapshot.messages[1].is_synced_to("t1"));
        assert_eq!(snapshot.state.phase, ThreadPhase::Synced);
        assert_eq!(snapshot.state.run_status, Some(RunStatus::Completed));

        let mut partial = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Message(m) = event {
                partial |= m.id == "msg_1" && !m.is_complete();
            }
        }
        assert!(partial);
        // Nothing was pushed back: the streamed reply is already on the thread
        assert_eq!(threads.thread_messages("t1").len(), 1);
    }

    #[tokio::test]
    async fn test_thread_lost_on_every_run_halts() {
        let completions = Arc::new(MockCompletionGateway::new());
        let threads = Arc::new(MockThreadGateway::new());
        threads.fail_runs(LlmError::desync("No thread found with id 't1'."));
        let prefs = Arc::new(MemoryPreferences::new());
        let handle = start(stateful(), &completions, Some(&threads), &prefs);

        handle.send_message("hi").await.unwrap();
        let snapshot = handle
            .wait_until(|s| s.error.is_some() && !s.state.busy, WAIT)
            .await
            .unwrap();
        assert_eq!(snapshot.state.error, Some(ErrorKind::ProtocolError));
        assert_eq!(threads.threads_created(), MAX_DESYNCS + 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(threads.threads_created(), MAX_DESYNCS + 1);
    }
}

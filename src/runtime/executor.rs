//! Session runtime executor

use super::{RuntimeError, SessionHandle};
use crate::config::SessionConfig;
use crate::llm::{CompletionGateway, EventStream, LlmError, ThreadGateway};
use crate::orchestrator::{apply, converge, Action, Effect, Event, StreamSource, TaskResult};
use crate::prefs::{PreferenceStore, ASSISTANT_ID_KEY, THREAD_ID_KEY};
use crate::session::{Session, SessionEvent, SessionSnapshot, SessionState};
use crate::stream::StreamEvent;
use crate::tools::{execute_call, ToolExecutor};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Owns one session and performs the work its transitions ask for
pub struct SessionRuntime {
    config: SessionConfig,
    completions: Arc<dyn CompletionGateway>,
    threads: Option<Arc<dyn ThreadGateway>>,
    tools: Arc<dyn ToolExecutor>,
    prefs: Arc<dyn PreferenceStore>,
}

impl SessionRuntime {
    pub fn new(
        config: SessionConfig,
        completions: Arc<dyn CompletionGateway>,
        tools: Arc<dyn ToolExecutor>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            config,
            completions,
            threads: None,
            tools,
            prefs,
        }
    }

    #[must_use]
    pub fn with_threads(mut self, threads: Arc<dyn ThreadGateway>) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Start the session task. Must be called inside a Tokio runtime.
    pub fn spawn(self) -> Result<SessionHandle, RuntimeError> {
        if self.config.mode.is_stateful() && self.threads.is_none() {
            return Err(RuntimeError::MissingThreadGateway);
        }

        let persisted_thread = self.read_pref(THREAD_ID_KEY);
        let persisted_assistant = self.read_pref(ASSISTANT_ID_KEY);
        let session = Session::new(&self.config, persisted_thread, persisted_assistant);

        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::of(&session));
        let shutdown = CancellationToken::new();

        let executor = Executor {
            cancel: shutdown.child_token(),
            shutdown: shutdown.clone(),
            session,
            config: self.config,
            completions: self.completions,
            threads: self.threads,
            tools: self.tools,
            prefs: self.prefs,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx: broadcast_tx.clone(),
            snapshot_tx,
            published: None,
            was_awaiting: false,
        };
        tokio::spawn(executor.run());

        Ok(SessionHandle {
            event_tx,
            broadcast_tx,
            snapshot_rx,
            shutdown,
        })
    }

    fn read_pref(&self, key: &str) -> Option<String> {
        self.prefs.get(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "Failed to read preference");
            None
        })
    }
}

struct Executor {
    session: Session,
    config: SessionConfig,
    completions: Arc<dyn CompletionGateway>,
    threads: Option<Arc<dyn ThreadGateway>>,
    tools: Arc<dyn ToolExecutor>,
    prefs: Arc<dyn PreferenceStore>,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so the loop ends once every handle and task is gone
    event_tx: mpsc::WeakSender<Event>,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Cancels the tasks of the current epoch
    cancel: CancellationToken,
    shutdown: CancellationToken,
    published: Option<SessionState>,
    was_awaiting: bool,
}

impl Executor {
    async fn run(mut self) {
        let mode = if self.config.mode.is_stateful() {
            "stateful"
        } else {
            "stateless"
        };
        tracing::info!(
            mode,
            streaming = self.config.streaming,
            "Starting session runtime"
        );
        self.converge();

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                event = self.event_rx.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
            }
        }

        self.cancel.cancel();
        tracing::info!("Session runtime stopped");
    }

    fn process_event(&mut self, event: Event) {
        for effect in apply(&mut self.session, &self.config, event) {
            self.execute_effect(effect);
        }
        self.converge();
    }

    fn converge(&mut self) {
        for action in converge(&mut self.session, &self.config, self.tools.as_ref()) {
            self.spawn_action(action);
        }
        self.publish();
    }

    /// Broadcast state and awaiting-input transitions, then refresh the snapshot
    fn publish(&mut self) {
        let state = self.session.state();
        if self.published.as_ref() != Some(&state) {
            let _ = self
                .broadcast_tx
                .send(SessionEvent::StateChange(state.clone()));
            self.published = Some(state);
        }

        let awaiting = self.session.awaiting_input();
        if awaiting && !self.was_awaiting {
            let _ = self.broadcast_tx.send(SessionEvent::AwaitingInput);
        }
        self.was_awaiting = awaiting;

        self.snapshot_tx
            .send_replace(SessionSnapshot::of(&self.session));
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Broadcast(event) => {
                let _ = self.broadcast_tx.send(event);
            }
            Effect::PersistThread(thread_id) => self.persist(THREAD_ID_KEY, thread_id.as_deref()),
            Effect::PersistAssistant(assistant_id) => {
                self.persist(ASSISTANT_ID_KEY, assistant_id.as_deref());
            }
            Effect::CancelInFlight => {
                self.cancel.cancel();
                self.cancel = self.shutdown.child_token();
            }
            Effect::DeleteThread(thread_id) => {
                let Some(threads) = self.threads.clone() else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = threads.delete_thread(&thread_id).await {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Failed to delete thread");
                    }
                });
            }
        }
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        if let Err(e) = self.prefs.put(key, value) {
            tracing::warn!(key, error = %e, "Failed to persist preference");
        }
    }

    fn spawn_action(&self, action: Action) {
        let Some(tx) = self.event_tx.upgrade() else {
            return;
        };
        tracing::debug!(
            action = action.kind().as_str(),
            epoch = self.session.epoch,
            "Starting action"
        );
        let task = Task {
            epoch: self.session.epoch,
            tx,
            cancel: self.cancel.clone(),
            completions: self.completions.clone(),
            threads: self.threads.clone(),
            tools: self.tools.clone(),
            streaming: self.config.streaming,
            poll_interval: self.config.poll_interval,
        };
        tokio::spawn(task.run(action));
    }
}

/// One spawned action, reporting back on the event channel
struct Task {
    epoch: u64,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
    completions: Arc<dyn CompletionGateway>,
    threads: Option<Arc<dyn ThreadGateway>>,
    tools: Arc<dyn ToolExecutor>,
    streaming: bool,
    poll_interval: Duration,
}

impl Task {
    async fn run(self, action: Action) {
        let kind = action.kind();
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(LlmError::cancelled()),
            outcome = self.perform(action) => outcome,
        };
        if let Err(error) = outcome {
            self.send(TaskResult::Failed {
                action: kind,
                error,
            })
            .await;
        }
    }

    /// Returns false once the runtime has gone away
    async fn send(&self, result: TaskResult) -> bool {
        self.tx.send(Event::task(self.epoch, result)).await.is_ok()
    }

    fn threads(&self) -> Result<&dyn ThreadGateway, LlmError> {
        self.threads
            .as_deref()
            .ok_or_else(|| LlmError::protocol("No thread gateway configured"))
    }

    async fn perform(&self, action: Action) -> Result<(), LlmError> {
        match action {
            Action::ExecuteTool(call) => {
                let message = execute_call(self.tools.as_ref(), &call).await;
                self.send(TaskResult::ToolFinished(message)).await;
            }
            Action::Greet(message) => {
                self.send(TaskResult::Greeted(message)).await;
            }
            Action::RequestModel(request) => {
                if self.streaming {
                    let stream = self.completions.run_stream(&request).await?;
                    self.forward(StreamSource::Model, stream).await?;
                } else {
                    let message = self.completions.run(&request).await?;
                    self.send(TaskResult::ModelResponse(message)).await;
                }
            }
            Action::CreateThread => {
                let thread_id = self.threads()?.create_thread().await?;
                self.send(TaskResult::ThreadCreated(thread_id)).await;
            }
            Action::LoadThread { thread_id } => {
                let threads = self.threads()?;
                let runs = threads.get_runs(&thread_id).await?;
                let messages = threads.get_messages(&thread_id).await?;
                self.send(TaskResult::ThreadLoaded { runs, messages }).await;
            }
            Action::SubmitToolOutputs {
                thread_id,
                submission,
            } => {
                let run = self
                    .threads()?
                    .submit_tool_outputs(&thread_id, &submission.run_id, &submission.outputs)
                    .await?;
                self.send(TaskResult::ToolOutputsSubmitted {
                    thread_id,
                    run,
                    message_ids: submission.message_ids,
                })
                .await;
            }
            Action::CreateRun {
                thread_id,
                request,
                sent,
            } => {
                let threads = self.threads()?;
                if self.streaming {
                    let stream = threads.create_run_stream(&thread_id, &request).await?;
                    if self.send(TaskResult::RunStreamOpened { sent }).await {
                        self.forward(StreamSource::Run, stream).await?;
                    }
                } else {
                    let run = threads.create_run(&thread_id, &request).await?;
                    self.send(TaskResult::RunCreated { run, sent }).await;
                }
            }
            Action::PollRun { thread_id, run_id } => {
                self.poll(self.threads()?, &thread_id, &run_id).await?;
            }
            Action::RefreshMessages { thread_id } => {
                let messages = self.threads()?.get_messages(&thread_id).await?;
                self.send(TaskResult::MessagesRefreshed(messages)).await;
            }
            Action::PushMessages {
                thread_id,
                messages,
            } => {
                let threads = self.threads()?;
                let mut pushed = Vec::with_capacity(messages.len());
                for message in &messages {
                    pushed.push(threads.create_thread_message(&thread_id, message).await?);
                }
                self.send(TaskResult::MessagesPushed(pushed)).await;
            }
        }
        Ok(())
    }

    /// Relay stream events until the stream ends, carries an error or
    /// reports done
    async fn forward(&self, source: StreamSource, mut stream: EventStream) -> Result<(), LlmError> {
        while let Some(event) = stream.next().await {
            let event = event?;
            let stop = matches!(event, StreamEvent::Error(_) | StreamEvent::Done);
            if !self.send(TaskResult::Stream { source, event }).await {
                return Ok(());
            }
            if stop {
                break;
            }
        }
        self.send(TaskResult::StreamClosed(source)).await;
        Ok(())
    }

    /// Poll until the run leaves the pollable statuses
    async fn poll(
        &self,
        threads: &dyn ThreadGateway,
        thread_id: &str,
        run_id: &str,
    ) -> Result<(), LlmError> {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let run = threads.get_run(thread_id, run_id).await?;
            let pollable = run.status.is_pollable();
            if !self.send(TaskResult::RunPolled(run)).await {
                return Ok(());
            }
            if !pollable {
                break;
            }
        }
        self.send(TaskResult::PollStopped).await;
        Ok(())
    }
}

//! Convoy terminal client
//!
//! Reads user turns from stdin and prints assistant replies. Logs go to
//! stderr as JSON.

use chrono::Utc;
use convoy::config::{Config, Mode};
use convoy::llm::{LoggingGateway, OpenAiCompletionGateway, OpenAiThreadGateway, Role};
use convoy::prefs::{MemoryPreferences, PreferenceStore, SqlitePreferences};
use convoy::runtime::SessionRuntime;
use convoy::session::SessionEvent;
use convoy::tools::ToolRegistry;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoy=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;

    let prefs: Arc<dyn PreferenceStore> = match &config.prefs_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening preference store");
            Arc::new(SqlitePreferences::open(path)?)
        }
        None => Arc::new(MemoryPreferences::new()),
    };

    let tools = ToolRegistry::new();
    tools.register_fn(
        "current_time",
        "Current date and time in UTC (RFC 3339)",
        json!({"type": "object", "properties": {}}),
        |_| async { Ok(json!(Utc::now().to_rfc3339())) },
    );

    let completions = LoggingGateway::new(
        OpenAiCompletionGateway::new(&config.gateway)?,
        "completions",
    );
    let mut runtime = SessionRuntime::new(
        config.session.clone(),
        Arc::new(completions),
        Arc::new(tools),
        prefs,
    );
    if let Mode::Stateful { target } = &config.session.mode {
        tracing::info!(run_target = ?target, "Using remote threads");
        let threads = LoggingGateway::new(OpenAiThreadGateway::new(&config.gateway)?, "threads");
        runtime = runtime.with_threads(Arc::new(threads));
    }
    let handle = runtime.spawn()?;

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        let mut printed = HashSet::new();
        loop {
            match events.recv().await {
                Ok(SessionEvent::Message(message)) => {
                    let visible = message.role == Role::Assistant
                        && message.is_complete()
                        && !message.content.is_empty();
                    if visible && printed.insert(message.id.clone()) {
                        println!("{}", message.content.text());
                    }
                }
                Ok(SessionEvent::Error(e)) => eprintln!("error ({}): {e}", e.kind),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/reset" => handle.reset().await?,
            text => {
                handle.send_message(text).await?;
            }
        }
    }

    handle.shutdown();
    Ok(())
}

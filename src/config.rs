//! Configuration

use crate::llm::RunTarget;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Connection settings shared by both gateways
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Stateless resends the history; stateful drives a remote thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Stateless,
    Stateful { target: RunTarget },
}

impl Mode {
    pub fn is_stateful(&self) -> bool {
        matches!(self, Mode::Stateful { .. })
    }
}

/// What produces the first assistant message of an empty session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StartBehavior {
    #[default]
    None,
    /// Fixed text, no model call
    Greeting(String),
    /// Model call with an empty history
    Model,
}

/// The model-facing persona of a session
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub instructions: Option<String>,
    pub extra_instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub start: StartBehavior,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instructions: None,
            extra_instructions: None,
            temperature: None,
            max_tokens: None,
            start: StartBehavior::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: Mode,
    pub streaming: bool,
    pub agent: AgentConfig,
    pub poll_interval: Duration,
    /// Answer calls to unregistered tools with an error instead of waiting
    pub answer_unknown_tools: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Stateless,
            streaming: false,
            agent: AgentConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            answer_unknown_tools: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    #[must_use]
    pub fn with_start(mut self, start: StartBehavior) -> Self {
        self.agent.start = start;
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.agent.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_answer_unknown_tools(mut self, answer: bool) -> Self {
        self.answer_unknown_tools = answer;
        self
    }
}

/// Everything the binary reads from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub prefs_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = var("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let gateway = GatewayConfig {
            api_key,
            base_url: var("CONVOY_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: parse::<u64>(&var, "CONVOY_TIMEOUT_SECS")?
                .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
        };

        let agent = AgentConfig {
            model: var("CONVOY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            instructions: var("CONVOY_INSTRUCTIONS"),
            temperature: parse(&var, "CONVOY_TEMPERATURE")?,
            max_tokens: parse(&var, "CONVOY_MAX_TOKENS")?,
            ..AgentConfig::default()
        };

        let mode = match var("CONVOY_MODE").as_deref() {
            None | Some("stateless") => Mode::Stateless,
            Some("stateful") => {
                let target = match (var("CONVOY_ASSISTANT_ID"), var("CONVOY_GRAPH_ID")) {
                    (Some(id), _) => RunTarget::Assistant(id),
                    (None, Some(id)) => RunTarget::Graph(id),
                    (None, None) => return Err(ConfigError::Missing("CONVOY_ASSISTANT_ID")),
                };
                Mode::Stateful { target }
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "CONVOY_MODE",
                    value: other.to_string(),
                })
            }
        };

        let session = SessionConfig {
            mode,
            streaming: parse(&var, "CONVOY_STREAM")?.unwrap_or(false),
            agent,
            ..SessionConfig::default()
        };

        Ok(Self {
            gateway,
            session,
            prefs_path: var("CONVOY_PREFS_PATH").map(PathBuf::from),
        })
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

//! Tool callbacks and their registry
//!
//! Tools are late-bound by name: the model may ask for anything, and lookup
//! happens at execution time.

mod dispatch;

pub use dispatch::{execute_call, ToolDispatcher};

use crate::llm::{ErrorKind, LlmError, ToolDefinition};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Tool callback failure. Becomes an error tool message, never a session error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl From<ToolError> for LlmError {
    fn from(e: ToolError) -> Self {
        LlmError::new(ErrorKind::ToolExecutionError, e.to_string())
    }
}

/// A named callback the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Output is opaque: strings are sent verbatim, other JSON compact-encoded
    async fn run(&self, input: Value) -> Result<Value, ToolError>;
}

/// Resolves tool calls by name
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;

    fn has_tool(&self, name: &str) -> bool;

    fn definitions(&self) -> Vec<ToolDefinition>;
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        (**self).execute(name, arguments).await
    }

    fn has_tool(&self, name: &str) -> bool {
        (**self).has_tool(name)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Tool backed by an async closure
pub struct FnTool {
    name: String,
    description: String,
    input_schema: Value,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Box::new(move |input| Box::pin(handler(input))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn run(&self, input: Value) -> Result<Value, ToolError> {
        (self.handler)(input).await
    }
}

/// Name -> tool map. Registration may happen while a session is running.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool.name().to_string(), tool);
    }

    pub fn register_fn<F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(FnTool::new(name, description, input_schema, handler));
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .lookup(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.run(arguments).await
    }

    fn has_tool(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

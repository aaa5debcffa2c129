//! Convoy - conversation orchestration over remote model APIs
//!
//! Drives a tool-calling conversation against either a stateless completion
//! endpoint (full history per call) or a stateful remote thread (runs,
//! polling and tool-output submission), keeping a local message store
//! convergent with the remote side.

pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod prefs;
pub mod reconciler;
pub mod runtime;
pub mod session;
pub mod store;
pub mod stream;
pub mod tools;

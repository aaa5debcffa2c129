//! Orchestrator: guarded transitions over one session
//!
//! Elm-style and pure. `converge` re-evaluates the ordered guards and returns
//! the actions to start; `apply` folds user input and task results back into
//! the session and returns the side effects for the runtime to perform.

mod action;
mod converge;
mod effect;
pub mod event;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use action::{Action, ActionKind};
pub use converge::converge;
pub use effect::Effect;
pub use event::{Event, StreamSource, TaskResult};
pub use transition::apply;

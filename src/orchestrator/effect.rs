//! Effects produced by `apply`

use crate::session::SessionEvent;

/// Side effects the runtime performs after a transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Notify subscribers
    Broadcast(SessionEvent),
    /// Store (`Some`) or clear (`None`) the durable thread id
    PersistThread(Option<String>),
    PersistAssistant(Option<String>),
    /// Abort in-flight model calls, streams and polling
    CancelInFlight,
    /// Best-effort remote cleanup after a reset
    DeleteThread(String),
}

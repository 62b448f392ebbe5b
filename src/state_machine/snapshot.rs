//! Read-only snapshot of session state for observers.

use super::SessionState;

/// Observers NEVER mutate this; they receive new snapshots via watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Generation of the most recent accepted request (0 before the first)
    pub generation: u64,
    /// Identity of the most recent accepted request
    pub identity: Option<String>,
}

impl SessionSnapshot {
    pub fn in_flight(&self) -> bool {
        self.state.is_in_flight()
    }
}

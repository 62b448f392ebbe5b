//! Commands that can mutate session state.
//!
//! All session state changes MUST go through the state machine's `apply()` method.
//! This is the only way to mutate session state, ensuring a single source of truth.

use serde::Serialize;

/// Commands that can mutate session state.
///
/// Every command except `Begin` carries the generation it was issued for;
/// commands for an older generation are ignored.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionCommand {
    /// Accept a new open request (rejected while one is in flight)
    Begin { identity: String },
    /// Start waiting for the primary surface
    AwaitSurface { generation: u64 },
    /// The document reached the primary surface
    MarkDelivered { generation: u64 },
    /// The primary surface timed out; the document goes to a fallback surface
    EscalateToFallback { generation: u64 },
    /// The request left the in-flight range on some exit path
    Finish { generation: u64 },
}

impl SessionCommand {
    /// Generation targeted by this command (`None` for `Begin`).
    pub fn generation(&self) -> Option<u64> {
        match self {
            SessionCommand::Begin { .. } => None,
            SessionCommand::AwaitSurface { generation }
            | SessionCommand::MarkDelivered { generation }
            | SessionCommand::EscalateToFallback { generation }
            | SessionCommand::Finish { generation } => Some(*generation),
        }
    }
}

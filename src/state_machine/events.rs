//! Events emitted by the session state machine after processing commands.
//!
//! These are for logging only. Observers get state through the watch channel's
//! `SessionSnapshot` and request progress through status events.

use super::SessionState;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A new open request was accepted
    RequestAccepted { generation: u64, identity: String },
    /// Session state changed
    StateChanged {
        generation: u64,
        from: SessionState,
        to: SessionState,
    },
    /// A command for a superseded generation arrived and was dropped
    StaleCommandIgnored { generation: u64, current: u64 },
}

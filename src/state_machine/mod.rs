//! Centralized state machine for open-request session state.
//!
//! This module provides the ONLY place where session transitions happen.
//! The state machine owns the state, validates commands, emits events,
//! and broadcasts snapshots to subscribers via a watch channel.
//!
//! Exactly one machine exists per host. Only one request may be in
//! {Opening, AwaitingSurface} at a time; a `Begin` while one is in flight is
//! rejected, never queued.

mod commands;
mod events;
mod snapshot;

pub use commands::SessionCommand;
pub use events::SessionEvent;
pub use snapshot::SessionSnapshot;

use crate::structured_logger::StructuredLogger;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the current open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Opening,
    AwaitingSurface,
    Delivered,
    FailedFallback,
    Done,
}

impl SessionState {
    /// States during which new open requests are rejected.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SessionState::Opening | SessionState::AwaitingSurface)
    }
}

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Another request is still in flight.
    InFlight {
        active_generation: u64,
        active_identity: String,
    },
    /// The command is not valid from the current state.
    Invalid {
        from: SessionState,
        command: &'static str,
    },
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InFlight {
                active_generation,
                active_identity,
            } => write!(
                f,
                "open request #{} for {} is still in flight",
                active_generation, active_identity
            ),
            Self::Invalid { from, command } => {
                write!(f, "cannot apply {} from {:?}", command, from)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// The ONLY place session transitions happen.
pub struct SessionMachine {
    state: SessionState,
    generation: u64,
    identity: Option<String>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    logger: Arc<StructuredLogger>,
    seq: u64,
}

impl SessionMachine {
    /// Creates an idle machine.
    ///
    /// Returns the machine and a watch receiver for session snapshots.
    pub fn new(logger: Arc<StructuredLogger>) -> (Self, watch::Receiver<SessionSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            state: SessionState::Idle,
            generation: 0,
            identity: None,
        });

        let machine = Self {
            state: SessionState::Idle,
            generation: 0,
            identity: None,
            snapshot_tx,
            logger,
            seq: 0,
        };

        (machine, snapshot_rx)
    }

    /// All mutations go through this single method.
    /// Returns events for logging; broadcasts snapshot automatically.
    pub fn apply(&mut self, command: SessionCommand) -> Result<Vec<SessionEvent>, TransitionError> {
        self.seq += 1;
        self.logger.log_command(self.seq, &command);

        let result = self.apply_internal(command);
        match &result {
            Ok(events) => {
                for event in events {
                    self.logger.log_event(self.seq, event);
                }
                let _ = self.snapshot_tx.send(self.snapshot());
            }
            Err(e) => {
                self.logger.log(
                    "Session",
                    serde_json::json!({
                        "type": "CommandRefused",
                        "machine_seq": self.seq,
                        "reason": e.to_string()
                    }),
                );
            }
        }
        result
    }

    fn apply_internal(&mut self, command: SessionCommand) -> Result<Vec<SessionEvent>, TransitionError> {
        use SessionState::*;

        if let Some(generation) = command.generation() {
            if generation != self.generation {
                return Ok(vec![SessionEvent::StaleCommandIgnored {
                    generation,
                    current: self.generation,
                }]);
            }
        }

        match command {
            SessionCommand::Begin { identity } => {
                if self.state.is_in_flight() {
                    return Err(TransitionError::InFlight {
                        active_generation: self.generation,
                        active_identity: self.identity.clone().unwrap_or_default(),
                    });
                }
                self.generation += 1;
                self.identity = Some(identity.clone());
                let mut events = vec![SessionEvent::RequestAccepted {
                    generation: self.generation,
                    identity,
                }];
                events.extend(self.transition(Opening));
                Ok(events)
            }

            SessionCommand::AwaitSurface { .. } => match self.state {
                AwaitingSurface => Ok(vec![]),
                Opening => Ok(self.transition(AwaitingSurface)),
                from => Err(TransitionError::Invalid {
                    from,
                    command: "AwaitSurface",
                }),
            },

            SessionCommand::MarkDelivered { .. } => match self.state {
                Delivered => Ok(vec![]),
                Opening | AwaitingSurface => Ok(self.transition(Delivered)),
                from => Err(TransitionError::Invalid {
                    from,
                    command: "MarkDelivered",
                }),
            },

            SessionCommand::EscalateToFallback { .. } => match self.state {
                FailedFallback => Ok(vec![]),
                AwaitingSurface => Ok(self.transition(FailedFallback)),
                from => Err(TransitionError::Invalid {
                    from,
                    command: "EscalateToFallback",
                }),
            },

            SessionCommand::Finish { .. } => match self.state {
                Done => Ok(vec![]),
                Idle => Err(TransitionError::Invalid {
                    from: Idle,
                    command: "Finish",
                }),
                _ => Ok(self.transition(Done)),
            },
        }
    }

    fn transition(&mut self, to: SessionState) -> Vec<SessionEvent> {
        let from = self.state;
        self.state = to;
        vec![SessionEvent::StateChanged {
            generation: self.generation,
            from,
            to,
        }]
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the most recent accepted request.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            generation: self.generation,
            identity: self.identity.clone(),
        }
    }
}

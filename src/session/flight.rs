//! Scoped acquisition of the single-flight latch.
//!
//! The latch is the session machine's in-flight range. [`FlightGuard`] enters
//! it on acquire and leaves it on drop, whichever way the open request exits.

use super::status::{StatusHandle, StatusSink};
use crate::protocol::{HostMessage, OpenStatus};
use crate::state_machine::{SessionCommand, SessionMachine, TransitionError};
use crate::surface::PrimarySlot;
use std::sync::{Arc, Mutex, PoisonError};

pub struct FlightGuard {
    machine: Arc<Mutex<SessionMachine>>,
    primary: PrimarySlot,
    generation: u64,
    status: Option<StatusHandle>,
}

impl FlightGuard {
    /// Accepts a new open request for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InFlight`] if another request holds the latch.
    pub(crate) fn acquire(
        machine: &Arc<Mutex<SessionMachine>>,
        primary: &PrimarySlot,
        sink: &StatusSink,
        identity: &str,
    ) -> Result<Self, TransitionError> {
        let generation = {
            let mut guard = machine.lock().unwrap_or_else(PoisonError::into_inner);
            guard.apply(SessionCommand::Begin {
                identity: identity.to_string(),
            })?;
            guard.generation()
        };

        let status = StatusHandle::opening(
            sink.clone(),
            Arc::clone(machine),
            generation,
            identity.to_string(),
        );
        primary.post_if_present(HostMessage::Status {
            value: OpenStatus::Opening,
        });

        Ok(Self {
            machine: Arc::clone(machine),
            primary: primary.clone(),
            generation,
            status: Some(status),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Applies a transition for this request. Refusals are logged.
    pub fn advance(&self, command: SessionCommand) {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = machine.apply(command) {
            tracing::warn!("request #{}: {}", self.generation, e);
        }
    }

    /// Transfers the request's status reporting to whoever finishes it later.
    ///
    /// The latch is still released when the guard drops; `Ready` is emitted
    /// when the returned handle drops instead.
    pub fn hand_off(&mut self) -> Option<StatusHandle> {
        self.status.take()
    }

    fn release(&self) {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        if machine.generation() == self.generation && machine.state().is_in_flight() {
            if let Err(e) = machine.apply(SessionCommand::Finish {
                generation: self.generation,
            }) {
                tracing::warn!("request #{} release: {}", self.generation, e);
            }
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.release();
        self.primary.post_if_present(HostMessage::Status {
            value: OpenStatus::Ready,
        });
        // `status` drops after this body and emits Ready when still owned.
    }
}

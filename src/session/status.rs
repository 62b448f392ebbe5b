//! Request-level status events.
//!
//! Each accepted open request produces `Opening`, then optionally `Opened` or
//! `Failed` (fallback path only), then exactly one `Ready`. `Ready` is emitted
//! when the request's [`StatusHandle`] drops, so no exit path can skip it.

use crate::state_machine::{SessionCommand, SessionMachine};
use crate::structured_logger::StructuredLogger;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    Opening,
    Opened,
    Failed,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub generation: u64,
    pub identity: String,
    pub status: RequestStatus,
}

/// Fan-out of status events to observers.
#[derive(Clone)]
pub struct StatusSink {
    tx: broadcast::Sender<StatusEvent>,
    logger: Arc<StructuredLogger>,
}

impl StatusSink {
    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { tx, logger }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: StatusEvent) {
        tracing::debug!(
            "request #{} {}: {:?}",
            event.generation,
            event.identity,
            event.status
        );
        self.logger.log_status(&event);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Status reporter for one open request.
///
/// Created when the request is accepted (emits `Opening`). Dropping it marks
/// the request finished and emits `Ready`.
pub struct StatusHandle {
    sink: StatusSink,
    machine: Arc<Mutex<SessionMachine>>,
    generation: u64,
    identity: String,
}

impl StatusHandle {
    pub(crate) fn opening(
        sink: StatusSink,
        machine: Arc<Mutex<SessionMachine>>,
        generation: u64,
        identity: String,
    ) -> Self {
        let handle = Self {
            sink,
            machine,
            generation,
            identity,
        };
        handle.emit(RequestStatus::Opening);
        handle
    }

    /// The document reached the primary surface through migration.
    pub fn opened(&self) {
        self.emit(RequestStatus::Opened);
    }

    /// The fallback path could not complete.
    pub fn failed(&self) {
        self.emit(RequestStatus::Failed);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn emit(&self, status: RequestStatus) {
        self.sink.emit(StatusEvent {
            generation: self.generation,
            identity: self.identity.clone(),
            status,
        });
    }
}

impl Drop for StatusHandle {
    fn drop(&mut self) {
        {
            let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = machine.apply(SessionCommand::Finish {
                generation: self.generation,
            }) {
                tracing::debug!("request #{} finish: {}", self.generation, e);
            }
        }
        self.emit(RequestStatus::Ready);
    }
}

//! Top-level orchestration of "open document" requests.
//!
//! [`SessionManager`] accepts open requests behind a single-flight latch,
//! seeds each delivery with the stored reading position, drives the primary
//! reveal, and escalates to a fallback surface when the primary surface does
//! not become ready in time. A timed-out document stays owed to the primary
//! surface as a [`PendingDelivery`] until the primary registers or a newer
//! request supersedes it.

mod flight;
mod pending;
mod status;

pub use pending::{PendingDelivery, PendingSlot};
pub use status::{RequestStatus, StatusEvent, StatusHandle, StatusSink};

use crate::config::ReaderConfig;
use crate::document::DocumentRef;
use crate::fallback::FallbackController;
use crate::location_store::{read_position, LocationStore};
use crate::protocol::{HostMessage, MigrationResult, OpenStatus, ProtocolViolation};
use crate::retry::RetryPolicy;
use crate::reveal::{Delivery, RevealCoordinator, RevealOutcome};
use crate::state_machine::{SessionCommand, SessionMachine, SessionSnapshot};
use crate::structured_logger::StructuredLogger;
use crate::surface::{PrimarySlot, Surface, SurfaceHost, SurfaceId};
use flight::FlightGuard;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};

/// How an `open` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Another request was in flight; nothing happened.
    Rejected,
    /// The document reached the primary surface.
    Delivered,
    /// The document is showing in a fallback surface.
    Fallback(SurfaceId),
    /// Neither surface could take the document. It stays pending for the
    /// primary surface.
    Failed,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    machine: Arc<Mutex<SessionMachine>>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    status: StatusSink,
    reveal: RevealCoordinator,
    fallback: FallbackController,
    pending: PendingSlot,
    store: Arc<dyn LocationStore>,
    reveal_policy: RetryPolicy,
}

impl SessionManager {
    pub fn new(
        host: Arc<dyn SurfaceHost>,
        store: Arc<dyn LocationStore>,
        config: &ReaderConfig,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        let (machine, snapshot_rx) = SessionMachine::new(Arc::clone(&logger));
        let primary = PrimarySlot::new();
        let pending = PendingSlot::new();
        let reveal = RevealCoordinator::new(primary, Arc::clone(&host));
        let fallback = FallbackController::new(
            host,
            reveal.clone(),
            Arc::clone(&store),
            pending.clone(),
            config.migration,
        );

        Self {
            inner: Arc::new(Inner {
                machine: Arc::new(Mutex::new(machine)),
                snapshot_rx,
                status: StatusSink::new(logger),
                reveal,
                fallback,
                pending,
                store,
                reveal_policy: config.reveal,
            }),
        }
    }

    /// Opens `doc`, unless another open request is in flight.
    ///
    /// Fire-and-forget from the caller's point of view: progress is observable
    /// through [`subscribe_status`](Self::subscribe_status). The returned
    /// outcome is informational.
    pub async fn open(&self, doc: DocumentRef) -> OpenOutcome {
        let inner = &self.inner;
        let mut guard = match FlightGuard::acquire(
            &inner.machine,
            inner.reveal.primary(),
            &inner.status,
            &doc.identity,
        ) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::info!("Ignoring open for {}: {}", doc.identity, e);
                return OpenOutcome::Rejected;
            }
        };
        let generation = guard.generation();

        // A newer request supersedes whatever was still owed to the primary.
        inner.pending.clear();

        let initial_position = read_position(inner.store.as_ref(), &doc.identity);
        let delivery = Delivery::new(doc, initial_position);

        guard.advance(SessionCommand::AwaitSurface { generation });
        match inner
            .reveal
            .reveal_and_deliver(&delivery, inner.reveal_policy)
            .await
        {
            RevealOutcome::Delivered { .. } => {
                guard.advance(SessionCommand::MarkDelivered { generation });
                OpenOutcome::Delivered
            }
            RevealOutcome::TimedOut { attempts } => {
                tracing::info!(
                    "Primary surface not usable for {} after {} attempts",
                    delivery.doc.identity,
                    attempts
                );
                self.escalate(&mut guard, &delivery)
            }
        }
    }

    /// Leaves `delivery` owed to the primary surface and shows it in a
    /// fallback surface.
    ///
    /// Runs under the pending-slot guard, the same one
    /// [`register_primary`](Self::register_primary) takes: a primary that
    /// registered after the last poll receives the document here, and one
    /// that registers later finds it pending together with its fallback.
    fn escalate(&self, guard: &mut FlightGuard, delivery: &Delivery) -> OpenOutcome {
        let inner = &self.inner;
        let generation = guard.generation();
        let mut pending = inner.pending.lock();

        if let Some(RevealOutcome::Delivered { .. }) = inner.reveal.deliver_to_primary(delivery) {
            tracing::info!(
                "Primary surface registered after the last poll; {} delivered",
                delivery.doc.identity
            );
            guard.advance(SessionCommand::MarkDelivered { generation });
            return OpenOutcome::Delivered;
        }

        tracing::info!("Escalating {} to a fallback surface", delivery.doc.identity);
        *pending = Some(PendingDelivery {
            doc: delivery.doc.clone(),
            generation,
        });
        guard.advance(SessionCommand::EscalateToFallback { generation });
        match inner.fallback.open_fallback(delivery, guard.hand_off()) {
            Ok(id) => OpenOutcome::Fallback(id),
            Err(e) => {
                tracing::warn!("Fallback for {} failed: {:#}", delivery.doc.identity, e);
                OpenOutcome::Failed
            }
        }
    }

    /// Records the primary surface and hands it any pending delivery.
    pub fn register_primary(&self, surface: Arc<dyn Surface>) {
        let inner = &self.inner;
        let mut slot = inner.pending.lock();
        inner.reveal.primary().register(Arc::clone(&surface));
        tracing::info!("Primary surface registered");

        let Some(pending) = slot.take() else {
            return;
        };
        let identity = pending.doc.identity.clone();
        let delivery = Delivery::new(
            pending.doc,
            read_position(inner.store.as_ref(), &identity),
        );

        if let Err(e) = surface.show() {
            tracing::warn!("Could not show primary surface: {:#}", e);
        }
        match surface.post(delivery.to_message()) {
            Ok(()) => {
                tracing::info!(
                    "Delivered pending {} (request #{}) to primary surface",
                    identity,
                    pending.generation
                );
                inner.fallback.reconcile_with_primary(&identity);
            }
            Err(e) => tracing::warn!("Could not deliver pending {}: {:#}", identity, e),
        }
    }

    /// Handles a migrate-to-primary request from surface `from`.
    pub async fn migrate(&self, from: SurfaceId) -> Result<MigrationResult, ProtocolViolation> {
        self.inner.fallback.migrate_to_primary(from).await
    }

    /// Persists a reported reading position.
    pub fn report_position(&self, identity: &str, marker: &str) -> anyhow::Result<()> {
        self.inner.store.put(identity, marker)
    }

    pub fn secondary_closed(&self, id: SurfaceId) {
        self.inner.fallback.surface_closed(id);
    }

    /// Reveals the primary surface without opening anything.
    pub async fn focus(&self) {
        if let Err(e) = self.inner.reveal.focus().await {
            tracing::warn!("Could not focus primary surface: {:#}", e);
        }
    }

    /// Posts a surface-level open status to `to`.
    pub fn post_status(&self, to: SurfaceId, value: OpenStatus) {
        let message = HostMessage::Status { value };
        match to {
            SurfaceId::Primary => self.inner.reveal.primary().post_if_present(message),
            secondary => {
                if let Err(e) = self.inner.fallback.post_to(secondary, message) {
                    tracing::debug!("Could not post status to {}: {:#}", secondary, e);
                }
            }
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.status.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Identity of the request holding the single-flight latch, if any.
    pub fn in_flight_identity(&self) -> Option<String> {
        let snapshot = self.inner.snapshot_rx.borrow();
        if snapshot.in_flight() {
            snapshot.identity.clone()
        } else {
            None
        }
    }

    pub fn primary(&self) -> &PrimarySlot {
        self.inner.reveal.primary()
    }

    pub fn fallback(&self) -> &FallbackController {
        &self.inner.fallback
    }

    /// Identity of the document still owed to the primary surface, if any.
    pub fn pending_identity(&self) -> Option<String> {
        self.inner.pending.peek_identity()
    }
}

#[cfg(test)]
#[path = "tests/session_manager_tests.rs"]
mod tests;

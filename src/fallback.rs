//! Secondary surfaces for documents the primary surface could not take in time.
//!
//! A fallback surface is self-contained: it is created synchronously, seeded
//! with the document, and offers a one-shot "migrate to primary" handshake.
//! Each fallback owns the open request's [`StatusHandle`] until it resolves,
//! so the request's `Ready` follows the fallback's outcome.

use crate::document::DocumentRef;
use crate::location_store::{read_position, LocationStore};
use crate::protocol::{HostMessage, MigrationResult, ProtocolViolation};
use crate::retry::RetryPolicy;
use crate::reveal::{Delivery, RevealCoordinator, RevealOutcome};
use crate::session::{PendingSlot, StatusHandle};
use crate::surface::{Surface, SurfaceHost, SurfaceId};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const MIGRATE_COMMAND: &str = "migrateToPrimary";

struct FallbackSession {
    surface: Arc<dyn Surface>,
    doc: DocumentRef,
    status: Option<StatusHandle>,
    /// Cleared once the migration handler has fired.
    armed: bool,
}

pub struct FallbackController {
    host: Arc<dyn SurfaceHost>,
    reveal: RevealCoordinator,
    store: Arc<dyn LocationStore>,
    pending: PendingSlot,
    migration: RetryPolicy,
    sessions: Mutex<HashMap<SurfaceId, FallbackSession>>,
}

impl FallbackController {
    pub fn new(
        host: Arc<dyn SurfaceHost>,
        reveal: RevealCoordinator,
        store: Arc<dyn LocationStore>,
        pending: PendingSlot,
        migration: RetryPolicy,
    ) -> Self {
        Self {
            host,
            reveal,
            store,
            pending,
            migration,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a secondary surface showing `delivery`.
    ///
    /// `status` is held until the fallback resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface cannot be created or seeded. The
    /// request is then reported `Failed`.
    pub fn open_fallback(&self, delivery: &Delivery, status: Option<StatusHandle>) -> Result<SurfaceId> {
        let id = SurfaceId::new_secondary();
        let title = format!("EPUB: {}", delivery.doc.display_name);

        let surface = match self.host.create_secondary(id, &title) {
            Ok(surface) => surface,
            Err(e) => {
                if let Some(status) = &status {
                    status.failed();
                }
                return Err(e).context("Failed to create fallback surface");
            }
        };

        if let Err(e) = surface.post(delivery.to_message()) {
            surface.dispose();
            if let Some(status) = &status {
                status.failed();
            }
            return Err(e).with_context(|| format!("Failed to seed fallback surface {}", id));
        }

        tracing::info!("Opened {} in fallback surface {}", delivery.doc.identity, id);
        self.lock_sessions().insert(
            id,
            FallbackSession {
                surface,
                doc: delivery.doc.clone(),
                status,
                armed: true,
            },
        );
        Ok(id)
    }

    /// Handles a `migrateToPrimary` request from surface `from`.
    ///
    /// On success the secondary surface is disposed and the request reports
    /// `Opened`; on timeout it reports `Failed` and the secondary stays open.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] if `from` has no armed handler.
    pub async fn migrate_to_primary(&self, from: SurfaceId) -> Result<MigrationResult, ProtocolViolation> {
        if from.is_primary() {
            return Err(ProtocolViolation::out_of_state(
                MIGRATE_COMMAND,
                "the primary surface cannot migrate",
            ));
        }

        let (surface, doc, status) = {
            // Disarming and claiming the pending delivery happen under the
            // hand-off guard, so a primary registering meanwhile either
            // reconciles this fallback first or finds nothing owed.
            let mut pending = self.pending.lock();
            let mut sessions = self.lock_sessions();
            let session = sessions
                .get_mut(&from)
                .filter(|s| s.armed)
                .ok_or_else(|| {
                    ProtocolViolation::out_of_state(
                        MIGRATE_COMMAND,
                        format!("no migration pending for {}", from),
                    )
                })?;
            session.armed = false;
            if pending
                .as_ref()
                .is_some_and(|p| p.doc.identity == session.doc.identity)
            {
                *pending = None;
            }
            (
                Arc::clone(&session.surface),
                session.doc.clone(),
                session.status.take(),
            )
        };

        let delivery = Delivery::new(
            doc.clone(),
            read_position(self.store.as_ref(), &doc.identity),
        );
        let outcome = self.reveal.reveal_and_deliver(&delivery, self.migration).await;

        let result = match outcome {
            RevealOutcome::Delivered { .. } => MigrationResult::Opened,
            RevealOutcome::TimedOut { .. } => MigrationResult::Failed,
        };
        if let Err(e) = surface.post(HostMessage::MigrationStatus { value: result }) {
            tracing::debug!("Could not post migration status to {}: {:#}", from, e);
        }

        match result {
            MigrationResult::Opened => {
                tracing::info!("Migrated {} from {} to primary", doc.identity, from);
                surface.dispose();
                self.lock_sessions().remove(&from);
                if let Some(status) = &status {
                    status.opened();
                }
            }
            MigrationResult::Failed => {
                tracing::info!("Migration of {} failed; {} stays open", doc.identity, from);
                if let Some(status) = &status {
                    status.failed();
                }
            }
        }
        Ok(result)
    }

    /// Resolves fallbacks showing `identity` as migrated, after the primary
    /// surface received that document.
    pub fn reconcile_with_primary(&self, identity: &str) {
        let resolved: Vec<(SurfaceId, FallbackSession)> = {
            let mut sessions = self.lock_sessions();
            let ids: Vec<SurfaceId> = sessions
                .iter()
                .filter(|(_, s)| s.armed && s.doc.identity == identity)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };

        for (id, session) in resolved {
            tracing::info!("Primary surface took over {} from {}", identity, id);
            if let Err(e) = session.surface.post(HostMessage::MigrationStatus {
                value: MigrationResult::Opened,
            }) {
                tracing::debug!("Could not post migration status to {}: {:#}", id, e);
            }
            session.surface.dispose();
            if let Some(status) = &session.status {
                status.opened();
            }
        }
    }

    /// The user closed secondary surface `id`.
    pub fn surface_closed(&self, id: SurfaceId) {
        let Some(session) = self.lock_sessions().remove(&id) else {
            return;
        };
        tracing::debug!("Fallback surface {} closed ({})", id, session.doc.identity);
        session.surface.dispose();
    }

    /// Posts to a live secondary surface.
    pub fn post_to(&self, id: SurfaceId, message: HostMessage) -> Result<()> {
        let surface = self
            .lock_sessions()
            .get(&id)
            .map(|s| Arc::clone(&s.surface))
            .with_context(|| format!("No fallback surface {}", id))?;
        surface.post(message)
    }

    /// Live secondary surfaces and the document each shows.
    pub fn active(&self) -> Vec<(SurfaceId, String)> {
        self.lock_sessions()
            .iter()
            .map(|(id, s)| (*id, s.doc.identity.clone()))
            .collect()
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SurfaceId, FallbackSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/fallback_tests.rs"]
mod tests;

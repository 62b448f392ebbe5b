//! The document owed to the primary surface.
//!
//! Set when an open request gives up waiting for the primary surface. Whoever
//! first gets the primary surface (a late registration or a migration) takes
//! it, so the document is delivered there at most once.

use crate::document::DocumentRef;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub doc: DocumentRef,
    pub generation: u64,
}

/// At most one outstanding delivery. Cloning shares the slot.
#[derive(Clone, Default)]
pub struct PendingSlot {
    inner: Arc<Mutex<Option<PendingDelivery>>>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any outstanding delivery.
    pub fn set(&self, pending: PendingDelivery) {
        if let Some(previous) = self.lock().replace(pending) {
            tracing::debug!(
                "Pending delivery for {} superseded",
                previous.doc.identity
            );
        }
    }

    pub fn take(&self) -> Option<PendingDelivery> {
        self.lock().take()
    }

    /// Holds the hand-off.
    ///
    /// Registering the primary surface, escalating to a fallback and claiming
    /// a delivery for migration each run under this guard, so none of them
    /// can observe the others half-done. Lock order: this slot before the
    /// fallback registry and the session machine.
    pub fn lock(&self) -> MutexGuard<'_, Option<PendingDelivery>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peek_identity(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .map(|p| p.doc.identity.clone())
    }

    pub fn clear(&self) {
        self.take();
    }
}

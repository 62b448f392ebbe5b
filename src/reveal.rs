//! Revealing the primary surface and pushing a document to it.
//!
//! The primary surface is created by the host UI framework on its own
//! schedule, and that completion is not observable. Revealing therefore asks
//! the host to activate the surface once and then polls the [`PrimarySlot`]
//! with a bounded [`RetryPolicy`] until the surface shows up or the budget is
//! spent.

use crate::document::DocumentRef;
use crate::protocol::HostMessage;
use crate::retry::{poll_until, RetryOutcome, RetryPolicy};
use crate::surface::{PrimarySlot, Surface, SurfaceHost};
use std::sync::Arc;

/// A document together with the position to open it at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub doc: DocumentRef,
    pub initial_position: Option<String>,
}

impl Delivery {
    pub fn new(doc: DocumentRef, initial_position: Option<String>) -> Self {
        Self {
            doc,
            initial_position,
        }
    }

    /// The `loadDocument` message carrying a copy of the document.
    pub fn to_message(&self) -> HostMessage {
        HostMessage::LoadDocument {
            identity: self.doc.identity.clone(),
            display_name: self.doc.display_name.clone(),
            payload: self.doc.payload.clone(),
            initial_position: self.initial_position.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// The document was posted to the primary surface.
    Delivered { attempts: u32 },
    /// The primary surface did not become usable within the budget.
    TimedOut { attempts: u32 },
}

impl RevealOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RevealOutcome::Delivered { .. })
    }
}

/// Owns the primary surface's reveal path.
#[derive(Clone)]
pub struct RevealCoordinator {
    primary: PrimarySlot,
    host: Arc<dyn SurfaceHost>,
}

impl RevealCoordinator {
    pub fn new(primary: PrimarySlot, host: Arc<dyn SurfaceHost>) -> Self {
        Self { primary, host }
    }

    pub fn primary(&self) -> &PrimarySlot {
        &self.primary
    }

    /// Reveals the primary surface and delivers `delivery` to it.
    ///
    /// Never retries past `policy`; what to do on [`RevealOutcome::TimedOut`]
    /// is the caller's decision.
    pub async fn reveal_and_deliver(&self, delivery: &Delivery, policy: RetryPolicy) -> RevealOutcome {
        if let Some(outcome) = self.deliver_to_primary(delivery) {
            return outcome;
        }

        if let Err(e) = self.host.activate_primary().await {
            tracing::warn!("Primary surface activation failed: {:#}", e);
        }

        let outcome = poll_until(policy, |attempt| {
            let found = self.primary.get();
            if found.is_none() {
                tracing::trace!("Primary surface not ready (attempt {})", attempt);
            }
            found
        })
        .await;

        match outcome {
            RetryOutcome::Ready { value, attempts } => {
                tracing::debug!("Primary surface ready after {} attempt(s)", attempts);
                deliver_to(value.as_ref(), delivery, attempts)
            }
            RetryOutcome::Exhausted { attempts } => {
                tracing::info!(
                    "Primary surface not ready after {} attempts ({:?})",
                    attempts,
                    policy.ceiling()
                );
                RevealOutcome::TimedOut { attempts }
            }
        }
    }

    /// Shows and delivers to the primary surface if it exists right now.
    ///
    /// Returns `None` without touching the host when there is no primary.
    pub fn deliver_to_primary(&self, delivery: &Delivery) -> Option<RevealOutcome> {
        self.primary
            .get()
            .map(|surface| deliver_to(surface.as_ref(), delivery, 1))
    }

    /// Brings the primary surface into view without delivering anything.
    pub async fn focus(&self) -> anyhow::Result<()> {
        match self.primary.get() {
            Some(surface) => surface.show(),
            None => self.host.activate_primary().await,
        }
    }
}

fn deliver_to(surface: &dyn Surface, delivery: &Delivery, attempts: u32) -> RevealOutcome {
    if let Err(e) = surface.show() {
        tracing::warn!("Could not show {}: {:#}", surface.id(), e);
    }
    match surface.post(delivery.to_message()) {
        Ok(()) => {
            tracing::info!(
                "Delivered {} to {} (position: {})",
                delivery.doc.identity,
                surface.id(),
                delivery.initial_position.as_deref().unwrap_or("none")
            );
            RevealOutcome::Delivered { attempts }
        }
        Err(e) => {
            tracing::warn!(
                "Could not post {} to {}: {:#}",
                delivery.doc.identity,
                surface.id(),
                e
            );
            RevealOutcome::TimedOut { attempts }
        }
    }
}

#[cfg(test)]
#[path = "tests/reveal_tests.rs"]
mod tests;

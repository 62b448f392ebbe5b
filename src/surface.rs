//! Render surfaces and the host capabilities that create them.
//!
//! A surface is anything that can be shown, receive protocol messages and be
//! disposed. The primary surface is long-lived and registered once, whenever
//! the host UI gets around to materializing it; secondary surfaces are created
//! on demand as a fallback and dispose themselves after migration or close.

use crate::protocol::HostMessage;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Identifies a surface in inbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceId {
    Primary,
    Secondary(Uuid),
}

impl SurfaceId {
    /// A fresh secondary surface ID.
    pub fn new_secondary() -> Self {
        SurfaceId::Secondary(Uuid::new_v4())
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, SurfaceId::Primary)
    }
}

impl Display for SurfaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceId::Primary => write!(f, "primary"),
            SurfaceId::Secondary(id) => write!(f, "secondary-{}", id),
        }
    }
}

/// Capabilities shared by every surface variant.
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// Brings the surface into view without taking focus.
    fn show(&self) -> Result<()>;

    /// Posts a message to the surface's client. Delivery is FIFO per sender.
    fn post(&self, message: HostMessage) -> Result<()>;

    /// Tears the surface down. Disposing twice is a no-op.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Host-side capabilities for materializing surfaces.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Asks the host UI to create/reveal the primary surface container.
    ///
    /// Idempotent. Completion does not imply the primary surface exists; it
    /// registers later through [`PrimarySlot::register`].
    async fn activate_primary(&self) -> Result<()>;

    /// Creates a self-contained secondary surface titled `title`.
    fn create_secondary(&self, id: SurfaceId, title: &str) -> Result<Arc<dyn Surface>>;
}

/// Registration point for the primary surface.
///
/// Cloning shares the slot.
#[derive(Clone, Default)]
pub struct PrimarySlot {
    inner: Arc<Mutex<Option<Arc<dyn Surface>>>>,
}

impl PrimarySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the primary surface. A later registration replaces the earlier
    /// one (the host UI recreated the view).
    pub fn register(&self, surface: Arc<dyn Surface>) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(surface);
    }

    /// Returns the primary surface if it exists.
    pub fn get(&self) -> Option<Arc<dyn Surface>> {
        let slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().filter(|s| !s.is_disposed()).cloned()
    }

    pub fn exists(&self) -> bool {
        self.get().is_some()
    }

    /// Posts to the primary surface if it exists; failures are logged.
    pub fn post_if_present(&self, message: HostMessage) {
        if let Some(surface) = self.get() {
            let command = message.command();
            if let Err(e) = surface.post(message) {
                tracing::warn!("Could not post {} to primary surface: {}", command, e);
            }
        }
    }
}

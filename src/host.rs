//! The host's event loop.
//!
//! Everything that happens to the host arrives as a [`HostEvent`]: inbound
//! surface traffic, the host UI materializing the primary surface, surfaces
//! closing, and user commands. Opens and migrations run as spawned tasks so
//! the loop keeps draining events (in particular `PrimaryResolved`) while a
//! reveal poll is waiting.

use crate::document::DocumentRef;
use crate::protocol::{decode_surface_message, OpenStatus, SurfaceMessage};
use crate::session::SessionManager;
use crate::structured_logger::StructuredLogger;
use crate::surface::{Surface, SurfaceId};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub enum HostEvent {
    /// A decoded message from a surface.
    Surface {
        from: SurfaceId,
        message: SurfaceMessage,
    },
    /// A message from a surface in wire form.
    RawSurface { from: SurfaceId, raw: String },
    /// The host UI created the primary surface.
    PrimaryResolved(Arc<dyn Surface>),
    /// The user closed a secondary surface.
    SecondaryClosed(SurfaceId),
    /// "Open EPUB" command, with a file (e.g. the active editor's) or without
    /// one (ask the picker).
    OpenCommand(Option<PathBuf>),
    /// "Focus reader" command.
    FocusCommand,
    Shutdown,
}

pub type HostSender = mpsc::UnboundedSender<HostEvent>;

pub fn channel() -> (HostSender, mpsc::UnboundedReceiver<HostEvent>) {
    mpsc::unbounded_channel()
}

/// The host's native file picker.
#[async_trait]
pub trait DocumentPicker: Send + Sync {
    /// Returns the chosen file, or `None` if the user cancelled.
    async fn pick(&self) -> Result<Option<PathBuf>>;
}

pub struct HostRuntime {
    session: SessionManager,
    picker: Arc<dyn DocumentPicker>,
    logger: Arc<StructuredLogger>,
    /// Set while a picker flow runs, from the pick through the open it starts.
    picking: Arc<AtomicBool>,
}

impl HostRuntime {
    pub fn new(
        session: SessionManager,
        picker: Arc<dyn DocumentPicker>,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self {
            session,
            picker,
            logger,
            picking: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Processes events until `Shutdown` or until every sender is gone.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        tracing::info!("Host runtime started");
        while let Some(event) = events.recv().await {
            match event {
                HostEvent::Surface { from, message } => self.dispatch(from, message),
                HostEvent::RawSurface { from, raw } => match decode_surface_message(&raw) {
                    Ok(message) => self.dispatch(from, message),
                    Err(violation) => {
                        tracing::warn!("Dropped message from {}: {}", from, violation);
                        self.logger.log_protocol_violation(&from, &violation);
                    }
                },
                HostEvent::PrimaryResolved(surface) => self.session.register_primary(surface),
                HostEvent::SecondaryClosed(id) => self.session.secondary_closed(id),
                HostEvent::OpenCommand(Some(path)) => self.spawn_open_path(path, None),
                HostEvent::OpenCommand(None) => self.spawn_open_via_picker(None),
                HostEvent::FocusCommand => {
                    let session = self.session.clone();
                    tokio::spawn(async move { session.focus().await });
                }
                HostEvent::Shutdown => break,
            }
        }
        tracing::info!("Host runtime stopped");
    }

    fn dispatch(&self, from: SurfaceId, message: SurfaceMessage) {
        tracing::debug!("{} -> host: {}", from, message.command());
        match message {
            SurfaceMessage::RequestOpen => self.spawn_open_via_picker(Some(from)),
            SurfaceMessage::ReportPosition {
                identity,
                position_marker,
            } => {
                if let Err(e) = self.session.report_position(&identity, &position_marker) {
                    // The document stays viewable; only persistence is lost.
                    tracing::warn!("Could not store position for {}: {:#}", identity, e);
                }
            }
            SurfaceMessage::MigrateToPrimary => {
                let session = self.session.clone();
                let logger = Arc::clone(&self.logger);
                tokio::spawn(async move {
                    if let Err(violation) = session.migrate(from).await {
                        tracing::warn!("Dropped message from {}: {}", from, violation);
                        logger.log_protocol_violation(&from, &violation);
                    }
                });
            }
        }
    }

    /// False (and logged) when an open request is already in flight.
    ///
    /// The primary surface is re-enabled when the running request finishes;
    /// a secondary requester is re-enabled right away.
    fn accepts_open(&self, requester: Option<SurfaceId>) -> bool {
        if let Some(identity) = self.session.in_flight_identity() {
            tracing::info!("Ignoring open command: {} is still opening", identity);
            notify_ready(&self.session, requester.filter(|id| !id.is_primary()));
            return false;
        }
        true
    }

    fn spawn_open_via_picker(&self, requester: Option<SurfaceId>) {
        if !self.accepts_open(requester) {
            return;
        }
        if self.picking.swap(true, Ordering::SeqCst) {
            tracing::info!("Ignoring open command: the file picker is already showing");
            notify_ready(&self.session, requester);
            return;
        }

        let session = self.session.clone();
        let picker = Arc::clone(&self.picker);
        let picking = Arc::clone(&self.picking);
        tokio::spawn(async move {
            match picker.pick().await {
                Ok(Some(path)) => open_path(&session, &path, requester).await,
                Ok(None) => {
                    tracing::debug!("Open cancelled");
                    notify_ready(&session, requester);
                }
                Err(e) => {
                    tracing::warn!("File picker failed: {:#}", e);
                    notify_ready(&session, requester);
                }
            }
            picking.store(false, Ordering::SeqCst);
        });
    }

    fn spawn_open_path(&self, path: PathBuf, requester: Option<SurfaceId>) {
        if !self.accepts_open(requester) {
            return;
        }
        let session = self.session.clone();
        tokio::spawn(async move { open_path(&session, &path, requester).await });
    }
}

async fn open_path(session: &SessionManager, path: &Path, requester: Option<SurfaceId>) {
    match DocumentRef::load(path).await {
        Ok(doc) => {
            session.open(doc).await;
        }
        Err(e) => {
            tracing::warn!("Could not open {}: {:#}", path.display(), e);
            notify_ready(session, requester);
        }
    }
}

/// Re-enables the requesting surface's open button when no request started.
fn notify_ready(session: &SessionManager, requester: Option<SurfaceId>) {
    if let Some(to) = requester {
        session.post_status(to, OpenStatus::Ready);
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;

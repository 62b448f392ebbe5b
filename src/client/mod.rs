//! The client that runs inside a render surface.
//!
//! `SurfaceClient` is a small state machine:
//!
//! ```text
//! Empty --loadDocument--> Loading --rendered--> Displaying
//!   Loading | Displaying --failure--> Error
//!   any --loadDocument--> Loading
//! ```
//!
//! Host messages come in through [`SurfaceClient::handle_host_message`]
//! (or [`handle_raw`](SurfaceClient::handle_raw) for wire text), engine
//! progress through [`SurfaceClient::handle_engine_event`]. Messages for the
//! host are returned to the caller, which owns the transport.

pub mod engine;

use crate::protocol::{
    decode_host_message, HostMessage, MigrationResult, OpenStatus, ProtocolViolation,
    SurfaceMessage,
};
use engine::{EngineEvent, LoadTicket, RenderEngine, RenderError};

pub const EMPTY_TITLE: &str = "EPUB Reader";
pub const LOADING_TITLE: &str = "Loading...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Empty,
    Loading { identity: String },
    Displaying { identity: String },
    Error { message: String },
}

/// What the surface's toolbar and status line show.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub title: String,
    pub open_enabled: bool,
    pub migrate_enabled: bool,
    pub position: Option<String>,
    pub progress: Option<f32>,
    pub chapter: Option<String>,
    pub error: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            title: EMPTY_TITLE.to_string(),
            open_enabled: true,
            migrate_enabled: false,
            position: None,
            progress: None,
            chapter: None,
            error: None,
        }
    }
}

/// The document the current ticket belongs to.
struct CurrentLoad {
    ticket: LoadTicket,
    display_name: String,
}

pub struct SurfaceClient<E: RenderEngine> {
    role: SurfaceRole,
    engine: E,
    state: ClientState,
    view: ViewState,
    next_ticket: u64,
    current: Option<CurrentLoad>,
}

impl<E: RenderEngine> SurfaceClient<E> {
    pub fn new(role: SurfaceRole, engine: E) -> Self {
        Self {
            role,
            engine,
            state: ClientState::Empty,
            view: ViewState::default(),
            next_ticket: 0,
            current: None,
        }
    }

    pub fn role(&self) -> SurfaceRole {
        self.role
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Decodes and handles a message in wire form. Violations are logged and
    /// leave the client unchanged.
    pub fn handle_raw(&mut self, raw: &str) -> Result<(), ProtocolViolation> {
        let result = decode_host_message(raw).and_then(|message| self.handle_host_message(message));
        if let Err(violation) = &result {
            tracing::warn!("{:?} surface dropped host message: {}", self.role, violation);
        }
        result
    }

    pub fn handle_host_message(&mut self, message: HostMessage) -> Result<(), ProtocolViolation> {
        match message {
            HostMessage::LoadDocument {
                identity,
                display_name,
                payload,
                initial_position,
            } => {
                self.load(identity, display_name, &payload, initial_position);
                Ok(())
            }
            HostMessage::Status { value } => {
                self.view.open_enabled = value == OpenStatus::Ready;
                Ok(())
            }
            HostMessage::MigrationStatus { value } => {
                if self.role == SurfaceRole::Primary {
                    return Err(ProtocolViolation::out_of_state(
                        "migrationStatus",
                        "the primary surface does not migrate",
                    ));
                }
                self.view.migrate_enabled = value == MigrationResult::Failed;
                Ok(())
            }
        }
    }

    fn load(
        &mut self,
        identity: String,
        display_name: String,
        payload: &[u8],
        initial_position: Option<String>,
    ) {
        if !matches!(self.state, ClientState::Empty) {
            self.engine.unload();
        }

        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.current = Some(CurrentLoad {
            ticket,
            display_name,
        });
        self.state = ClientState::Loading { identity };
        self.view.title = LOADING_TITLE.to_string();
        self.view.migrate_enabled = false;
        self.view.position = None;
        self.view.progress = None;
        self.view.chapter = None;
        self.view.error = None;

        if let Err(e) = self.engine.load(ticket, payload) {
            self.fail(e.to_string());
            return;
        }

        let displayed = match self.engine.display(ticket, initial_position.as_deref()) {
            Err(RenderError::PositionRejected(marker)) if initial_position.is_some() => {
                // A marker from an older build or an edited document: start over.
                tracing::info!("Stored position {} rejected; displaying from the start", marker);
                self.engine.display(ticket, None)
            }
            other => other,
        };
        if let Err(e) = displayed {
            self.fail(e.to_string());
        }
    }

    /// Applies an engine event and returns the messages it produces for the host.
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> Vec<SurfaceMessage> {
        let current = self.current.as_ref().map(|c| c.ticket);
        if current != Some(event.ticket()) {
            tracing::debug!("Ignoring engine event for superseded load {:?}", event.ticket());
            return Vec::new();
        }

        match event {
            EngineEvent::Rendered { .. } => {
                if let ClientState::Loading { identity } = &self.state {
                    self.state = ClientState::Displaying {
                        identity: identity.clone(),
                    };
                    self.view.title = self
                        .current
                        .as_ref()
                        .map(|c| c.display_name.clone())
                        .unwrap_or_default();
                    self.view.migrate_enabled = self.role == SurfaceRole::Secondary;
                }
                Vec::new()
            }
            EngineEvent::Relocated {
                marker,
                progress,
                chapter,
                ..
            } => {
                let ClientState::Displaying { identity } = &self.state else {
                    return Vec::new();
                };
                let report = SurfaceMessage::ReportPosition {
                    identity: identity.clone(),
                    position_marker: marker.clone(),
                };
                self.view.position = Some(marker);
                self.view.progress = progress.map(|p| p.clamp(0.0, 1.0));
                self.view.chapter = chapter;
                vec![report]
            }
            EngineEvent::Failed { message, .. } => {
                if matches!(
                    self.state,
                    ClientState::Loading { .. } | ClientState::Displaying { .. }
                ) {
                    self.fail(message);
                }
                Vec::new()
            }
        }
    }

    /// The user clicked "open".
    pub fn request_open(&mut self) -> Option<SurfaceMessage> {
        if !self.view.open_enabled {
            return None;
        }
        Some(SurfaceMessage::RequestOpen)
    }

    /// The user clicked "open in main panel" (secondary surfaces only).
    pub fn request_migration(&mut self) -> Option<SurfaceMessage> {
        if self.role != SurfaceRole::Secondary || !self.view.migrate_enabled {
            return None;
        }
        self.view.migrate_enabled = false;
        Some(SurfaceMessage::MigrateToPrimary)
    }

    /// The retry action offered in the Error state.
    pub fn retry(&mut self) -> Option<SurfaceMessage> {
        if !matches!(self.state, ClientState::Error { .. }) {
            return None;
        }
        Some(SurfaceMessage::RequestOpen)
    }

    pub fn next_page(&mut self) {
        if matches!(self.state, ClientState::Displaying { .. }) {
            if let Err(e) = self.engine.next_page() {
                self.fail(e.to_string());
            }
        }
    }

    pub fn prev_page(&mut self) {
        if matches!(self.state, ClientState::Displaying { .. }) {
            if let Err(e) = self.engine.prev_page() {
                self.fail(e.to_string());
            }
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!("{:?} surface error: {}", self.role, message);
        self.view.error = Some(message.clone());
        self.view.migrate_enabled = false;
        self.state = ClientState::Error { message };
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;

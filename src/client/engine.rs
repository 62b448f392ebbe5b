//! Boundary to the document rendering engine.
//!
//! The engine paginates raw document bytes and reports progress back as
//! [`EngineEvent`]s. Every load gets a [`LoadTicket`]; events carry the ticket
//! of the load they belong to so results of a superseded load can be told
//! apart.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket(pub u64);

pub trait RenderEngine: Send {
    /// Starts loading `payload`. Completion is reported as an event.
    fn load(&mut self, ticket: LoadTicket, payload: &[u8]) -> Result<(), RenderError>;

    /// Displays the loaded document at `position`, or at the start.
    fn display(&mut self, ticket: LoadTicket, position: Option<&str>) -> Result<(), RenderError>;

    fn next_page(&mut self) -> Result<(), RenderError>;

    fn prev_page(&mut self) -> Result<(), RenderError>;

    /// Discards the current document.
    fn unload(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The first page of the load is on screen.
    Rendered { ticket: LoadTicket },
    /// The visible location changed.
    Relocated {
        ticket: LoadTicket,
        marker: String,
        /// Fraction of the document read, 0.0 to 1.0.
        progress: Option<f32>,
        /// Label of the current table-of-contents entry.
        chapter: Option<String>,
    },
    /// Rendering failed after loading started.
    Failed { ticket: LoadTicket, message: String },
}

impl EngineEvent {
    pub fn ticket(&self) -> LoadTicket {
        match self {
            EngineEvent::Rendered { ticket }
            | EngineEvent::Relocated { ticket, .. }
            | EngineEvent::Failed { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The payload is not a document the engine can read.
    Unreadable(String),
    /// The requested position does not exist in this document.
    PositionRejected(String),
    Engine(String),
}

impl Display for RenderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable(reason) => write!(f, "unreadable document: {}", reason),
            Self::PositionRejected(marker) => write!(f, "position '{}' rejected", marker),
            Self::Engine(message) => write!(f, "rendering failed: {}", message),
        }
    }
}

impl std::error::Error for RenderError {}

//! Host/surface session coordination for an EPUB reader.
//!
//! An "open this document" request travels from the host to a render surface
//! that may not exist yet. This crate makes that hand-off reliable: one open
//! request in flight at a time, a bounded wait for the primary surface, a
//! fallback surface when the wait runs out, a migrate-back handshake, and
//! persisted reading positions keyed by document identity.

pub mod client;
pub mod config;
pub mod document;
pub mod fallback;
pub mod host;
pub mod location_store;
pub mod protocol;
pub mod reader_paths;
pub mod retry;
pub mod reveal;
pub mod session;
pub mod sim;
pub mod state_machine;
pub mod structured_logger;
pub mod surface;

//! Structured JSONL logger for debugging and session reconstruction.
//!
//! This module provides machine-parseable logging with:
//! - Monotonic sequence numbers for ordering
//! - ISO 8601 timestamps with microsecond precision
//! - Host session IDs for correlation
//! - Structured event data in JSON format

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::protocol::ProtocolViolation;
use crate::session::StatusEvent;
use crate::state_machine::{SessionCommand, SessionEvent};
use crate::surface::SurfaceId;

/// Structured JSONL logger for debugging and session reconstruction.
pub struct StructuredLogger {
    session_id: String,
    seq: AtomicU64,
    log_file: Option<Mutex<File>>,
    log_path: Option<PathBuf>,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across entire host session)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    /// Host session ID
    pub session_id: String,
    /// Component that emitted the log
    pub component: String,
    /// Structured event data
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a new structured logger for the given host session.
    ///
    /// Logs are written to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            seq: AtomicU64::new(0),
            log_file: Some(Mutex::new(file)),
            log_path: Some(log_path),
        })
    }

    /// A logger that drops every entry.
    pub fn disabled() -> Self {
        Self {
            session_id: String::new(),
            seq: AtomicU64::new(0),
            log_file: None,
            log_path: None,
        }
    }

    /// Returns the next sequence number.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event.
    ///
    /// The event is serialized to JSON and written as a single line.
    /// This method is thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let Some(log_file) = &self.log_file else {
            return;
        };

        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            session_id: self.session_id.clone(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs a session state-machine command.
    pub fn log_command(&self, machine_seq: u64, command: &SessionCommand) {
        self.log(
            "Session",
            serde_json::json!({
                "type": "Command",
                "machine_seq": machine_seq,
                "command": command
            }),
        );
    }

    /// Logs a session state-machine event.
    pub fn log_event(&self, machine_seq: u64, event: &SessionEvent) {
        self.log(
            "Session",
            serde_json::json!({
                "type": "Event",
                "machine_seq": machine_seq,
                "event": event
            }),
        );
    }

    /// Logs a request-level status event.
    pub fn log_status(&self, status: &StatusEvent) {
        self.log(
            "Status",
            serde_json::json!({
                "type": "Status",
                "status": status
            }),
        );
    }

    /// Logs a dropped protocol message.
    pub fn log_protocol_violation(&self, from: &SurfaceId, violation: &ProtocolViolation) {
        self.log(
            "Protocol",
            serde_json::json!({
                "type": "Violation",
                "from": from.to_string(),
                "violation": violation.to_string()
            }),
        );
    }

    /// Returns the path to the log file, if logging is enabled.
    pub fn path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    /// Returns the current host session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;

//! Centralized home-based storage paths for reader-session persistence.
//!
//! Everything lives under `~/.reader-session/`:
//! - `config.yaml` - Optional host configuration
//! - `locations.json` - Persisted reading positions
//! - `locations.lock` - Cross-process lock guarding `locations.json`
//! - `logs/` - Structured event logs
//!
//! `READER_SESSION_HOME` overrides the home directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the reader-session directory.
const READER_SESSION_DIR: &str = ".reader-session";

/// Environment variable overriding the storage root.
pub const HOME_OVERRIDE_ENV: &str = "READER_SESSION_HOME";

/// Returns the storage root: `$READER_SESSION_HOME` or `~/.reader-session/`.
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn reader_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_OVERRIDE_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::home_dir()
            .context("Could not determine home directory for reader storage")?
            .join(READER_SESSION_DIR),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create reader directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the default config path: `~/.reader-session/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(reader_home_dir()?.join("config.yaml"))
}

/// Returns the default location store path: `~/.reader-session/locations.json`
pub fn locations_path() -> Result<PathBuf> {
    Ok(reader_home_dir()?.join("locations.json"))
}

/// Returns the logs directory: `~/.reader-session/logs/`
///
/// Creates the directory if it doesn't exist.
pub fn logs_dir() -> Result<PathBuf> {
    let dir = reader_home_dir()?.join("logs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
#[path = "tests/reader_paths_tests.rs"]
mod tests;

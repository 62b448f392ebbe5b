//! Persistent reading positions keyed by document identity.
//!
//! ## Design Decisions
//!
//! - **Last write wins**: `put` replaces the record for a key; there is no merge.
//!   Duplicate reports from a surface are harmless.
//! - **Never compacted**: records for documents that no longer exist are kept.
//! - **Versioned records**: each record carries the marker format it was written
//!   with. Records with an unknown format read as absent but stay on disk, so a
//!   newer build can still use them.
//! - **Atomic writes**: the file is rewritten to a temporary path and renamed,
//!   under an exclusive lock on `locations.lock` so concurrent hosts don't lose
//!   each other's keys.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Current store file format version.
///
/// Version history:
/// - v1: Initial version with per-record marker format and timestamp
pub const STORE_VERSION: u32 = 1;

/// Marker format written by this build. Position markers are opaque engine
/// tokens; bump this when the engine's marker grammar changes.
pub const MARKER_FORMAT: u32 = 1;

/// Persistent mapping from document identity to last reading position.
pub trait LocationStore: Send + Sync {
    /// Returns the stored position marker for a document, if any.
    fn get(&self, identity: &str) -> Result<Option<String>>;

    /// Stores a position marker for a document, replacing any previous one.
    fn put(&self, identity: &str, marker: &str) -> Result<()>;
}

/// Storage key for a document identity.
pub fn location_key(identity: &str) -> String {
    format!("readerSession:lastLocation:{}", identity)
}

/// Reads the stored position for delivery. Storage errors read as "no
/// position"; the document is still viewable without one.
pub fn read_position(store: &dyn LocationStore, identity: &str) -> Option<String> {
    match store.get(identity) {
        Ok(marker) => marker,
        Err(e) => {
            tracing::warn!("Could not read stored position for {}: {:#}", identity, e);
            None
        }
    }
}

/// A persisted position record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub marker: String,
    #[serde(default = "default_marker_format")]
    pub marker_format: u32,
    /// RFC3339 timestamp of the last write.
    #[serde(default)]
    pub saved_at: String,
}

fn default_marker_format() -> u32 {
    MARKER_FORMAT
}

impl StoredLocation {
    fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            marker_format: MARKER_FORMAT,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Returns the marker if this build understands its format.
    fn current_marker(&self) -> Option<&str> {
        (self.marker_format == MARKER_FORMAT).then_some(self.marker.as_str())
    }
}

/// On-disk layout of `locations.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocationFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, StoredLocation>,
}

impl Default for LocationFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// JSON-file backed location store.
pub struct FileLocationStore {
    path: PathBuf,
    lock_path: PathBuf,
    cache: Mutex<LocationFile>,
}

impl FileLocationStore {
    /// Opens the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is an empty store. A corrupt file is moved aside to
    /// `<path>.corrupt` and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file was
    /// written by a newer store version.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create location store directory: {}", parent.display())
            })?;
        }

        let lock_path = path.with_extension("lock");
        let file = read_location_file(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_path,
            cache: Mutex::new(file),
        })
    }

    /// Opens the store at the default location (`~/.reader-session/locations.json`).
    pub fn open_default() -> Result<Self> {
        Self::open(&crate::reader_paths::locations_path()?)
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns all records, keyed by document identity.
    pub fn entries(&self) -> Vec<(String, StoredLocation)> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entries
            .iter()
            .map(|(key, record)| {
                let identity = key
                    .strip_prefix(&location_key(""))
                    .unwrap_or(key)
                    .to_string();
                (identity, record.clone())
            })
            .collect()
    }

    fn with_file_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open lock file: {}", self.lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .with_context(|| format!("Failed to lock: {}", self.lock_path.display()))?;
        let result = f();
        let _ = lock_file.unlock();
        result
    }
}

impl LocationStore for FileLocationStore {
    fn get(&self, identity: &str) -> Result<Option<String>> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cache
            .entries
            .get(&location_key(identity))
            .and_then(|record| record.current_marker())
            .map(str::to_string))
    }

    fn put(&self, identity: &str, marker: &str) -> Result<()> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let merged = self.with_file_lock(|| {
            // Re-read under the lock so keys written by other hosts survive.
            let mut file = read_location_file(&self.path)?;
            file.entries
                .insert(location_key(identity), StoredLocation::new(marker));
            write_location_file(&self.path, &file)?;
            Ok(file)
        })?;
        *cache = merged;
        Ok(())
    }
}

fn read_location_file(path: &Path) -> Result<LocationFile> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LocationFile::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read locations: {}", path.display()))
        }
    };

    match serde_json::from_str::<LocationFile>(&content) {
        Ok(file) if file.version > STORE_VERSION => bail!(
            "Location store {} has version {} (this build supports {})",
            path.display(),
            file.version,
            STORE_VERSION
        ),
        Ok(file) => Ok(file),
        Err(e) => {
            let backup = path.with_extension("json.corrupt");
            tracing::warn!(
                "Corrupt location store {} ({}), moving it to {}",
                path.display(),
                e,
                backup.display()
            );
            let _ = fs::rename(path, &backup);
            Ok(LocationFile::default())
        }
    }
}

fn write_location_file(path: &Path, file: &LocationFile) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(file).context("Failed to serialize locations")?;
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp locations: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename locations into place: {}", path.display()))?;
    Ok(())
}

/// Process-local store, used when persistence is disabled.
#[derive(Default)]
pub struct MemoryLocationStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationStore for MemoryLocationStore {
    fn get(&self, identity: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&location_key(identity)).cloned())
    }

    fn put(&self, identity: &str, marker: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(location_key(identity), marker.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/location_store_tests.rs"]
mod tests;

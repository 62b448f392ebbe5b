//! Documents selected for display.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// The only document format the reader displays.
pub const SUPPORTED_EXTENSION: &str = "epub";

/// A document selected for display.
///
/// `identity` is both the persistence key for reading positions and the
/// de-duplication key for open requests. Surfaces receive copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub identity: String,
    pub display_name: String,
    pub payload: Vec<u8>,
}

impl DocumentRef {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            payload,
        }
    }

    /// Reads a document from disk.
    ///
    /// The identity is the `file://` URI of the absolute path and the display
    /// name is the file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not an EPUB or cannot be read.
    pub async fn load(path: &Path) -> Result<Self> {
        ensure_supported(path)?;

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve current directory")?
                .join(path)
        };

        let payload = tokio::fs::read(&absolute)
            .await
            .with_context(|| format!("Failed to read document: {}", absolute.display()))?;

        let display_name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| absolute.display().to_string());

        Ok(Self {
            identity: file_identity(&absolute),
            display_name,
            payload,
        })
    }
}

/// Rejects files that are not EPUBs.
pub fn ensure_supported(path: &Path) -> Result<()> {
    let supported = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SUPPORTED_EXTENSION));
    if !supported {
        bail!("{} is not an EPUB", path.display());
    }
    Ok(())
}

/// Builds the stable `file://` identity for an absolute path.
pub fn file_identity(absolute: &Path) -> String {
    let path = absolute.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}

#[cfg(test)]
#[path = "tests/document_tests.rs"]
mod tests;

use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReaderConfig {
    /// Budget for revealing the primary surface when opening a document.
    #[serde(default = "default_reveal_policy")]
    pub reveal: RetryPolicy,
    /// Budget for moving a fallback document to the primary surface.
    #[serde(default = "default_migration_policy")]
    pub migration: RetryPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            reveal: default_reveal_policy(),
            migration: default_migration_policy(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_reveal_policy() -> RetryPolicy {
    RetryPolicy::REVEAL
}

fn default_migration_policy() -> RetryPolicy {
    RetryPolicy::MIGRATION
}

/// Where reading positions are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Overrides `~/.reader-session/locations.json`.
    #[serde(default)]
    pub locations_file: Option<PathBuf>,
    /// When false, positions live in memory for the life of the host only.
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            locations_file: None,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Write the JSONL event log under `~/.reader-session/logs/`.
    #[serde(default = "default_true")]
    pub events_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            events_log: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "info".to_string()
}

impl ReaderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or the default config file when `path` is `None`.
    ///
    /// A missing default config file yields the defaults; an explicitly named
    /// file must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = crate::reader_paths::config_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, policy) in [("reveal", &self.reveal), ("migration", &self.migration)] {
            if policy.interval.is_zero() {
                anyhow::bail!("{}.interval_ms must be greater than zero", name);
            }
            if policy.max_attempts == 0 {
                anyhow::bail!("{}.max_attempts must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Resolved path of the location store file.
    pub fn locations_path(&self) -> Result<PathBuf> {
        match &self.storage.locations_file {
            Some(path) => Ok(path.clone()),
            None => crate::reader_paths::locations_path(),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

//! Sync watermark persistence.
//!
//! The timestamp of the last successful sync is the only state the
//! orchestrator keeps between runs. It lives in a small TOML sidecar next to
//! the mirror file; a missing or corrupt sidecar reads as "never synced" and
//! causes the next pull to treat the entire remote set as new.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            version: CURRENT_VERSION,
            last_sync: None,
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on the watermark sidecar file.
#[derive(Debug, Clone)]
pub struct WatermarkFile {
    path: PathBuf,
}

impl WatermarkFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sidecar path for a given mirror file: `bookings.csv` ->
    /// `bookings.sync.toml`.
    pub fn for_mirror(mirror_path: &Path) -> Self {
        Self::new(mirror_path.with_extension("sync.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last-sync timestamp. A missing file is "never synced"; a
    /// corrupt file is logged and also treated as "never synced".
    pub fn load(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read sync state at {}", self.path.display()))?;

        match toml::from_str::<SyncState>(&contents) {
            Ok(state) => Ok(state.last_sync),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "sync state file corrupt, treating as never synced"
                );
                Ok(None)
            }
        }
    }

    pub fn store(&self, last_sync: DateTime<Utc>) -> Result<()> {
        let state = SyncState {
            version: CURRENT_VERSION,
            last_sync: Some(last_sync),
        };
        let contents = toml::to_string_pretty(&state).context("failed to serialize sync state")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create state directory {}", parent.display())
                })?;
            }
        }
        fs::write(&self.path, contents)
            .with_context(|| format!("failed to write sync state to {}", self.path.display()))?;
        Ok(())
    }
}

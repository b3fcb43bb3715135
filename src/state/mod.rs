//! Persisted record of installed components.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{StateError, chain};
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledEntry {
    pub version: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    #[serde(default)]
    pub files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstalledState {
    #[serde(default)]
    pub components: BTreeMap<String, InstalledEntry>,
}

impl InstalledState {
    pub fn get(&self, id: &str) -> Option<&InstalledEntry> {
        self.components.get(id)
    }

    pub fn version_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|e| e.version.as_str())
    }
}

/// Loads and atomically persists [`InstalledState`] at a fixed path.
pub struct StateStore<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
}

impl<R: Runtime> StateStore<R> {
    pub fn new(runtime: Arc<R>, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file. A missing file is an empty state.
    pub fn read(&self) -> Result<InstalledState, StateError> {
        if !self.runtime.exists(&self.path) {
            debug!("No installed state at {:?}", self.path);
            return Ok(InstalledState::default());
        }
        let text = self
            .runtime
            .read_to_string(&self.path)
            .map_err(|e| StateError::Read {
                path: self.path.clone(),
                reason: chain(&e),
            })?;
        serde_json::from_str(&text).map_err(|e| StateError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Like [`StateStore::read`], but an unreadable or corrupt file is
    /// logged and treated as empty so every component gets reinstalled.
    pub fn load(&self) -> InstalledState {
        self.read().unwrap_or_else(|e| {
            warn!("{}; assuming nothing is installed", e);
            InstalledState::default()
        })
    }

    /// Writes to a temporary sibling, then renames it over the state file.
    #[tracing::instrument(skip(self, state))]
    pub fn save(&self, state: &InstalledState) -> Result<(), StateError> {
        let write_error = |reason: String| StateError::Write {
            path: self.path.clone(),
            reason,
        };
        let json = serde_json::to_string_pretty(state).map_err(|e| write_error(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            self.runtime
                .create_dir_all(parent)
                .map_err(|e| write_error(chain(&e)))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        self.runtime
            .write(&tmp, json.as_bytes())
            .map_err(|e| write_error(chain(&e)))?;
        if let Err(e) = self.runtime.rename(&tmp, &self.path) {
            let _ = self.runtime.remove_file(&tmp);
            return Err(write_error(chain(&e)));
        }
        debug!("Saved installed state to {:?}", self.path);
        Ok(())
    }
}

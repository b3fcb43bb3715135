//! Interruption cleanup.
//!
//! Staging directories are registered here while an extraction runs. On
//! Ctrl-C the binary removes whatever is still registered. Download part
//! files are never registered so an interrupted transfer can resume.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::runtime::Runtime;

/// Tracks paths that need cleanup on interruption
#[derive(Debug, Default)]
pub struct CleanupContext {
    pub(crate) paths: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Remove every registered path, returning how many were removed.
    pub fn cleanup(&mut self, runtime: &dyn Runtime) -> usize {
        let mut removed = 0;
        for path in self.paths.drain(..) {
            debug!("Cleaning up: {:?}", path);
            let result = if runtime.is_dir(&path) {
                runtime.remove_dir_all(&path)
            } else if runtime.exists(&path) {
                runtime.remove_file(&path)
            } else {
                continue;
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to clean up {:?}: {:#}", path, e),
            }
        }
        removed
    }
}

pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}

/// Lock the context, recovering it if a holder panicked.
pub fn lock(ctx: &SharedCleanupContext) -> MutexGuard<'_, CleanupContext> {
    ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registers a path for the lifetime of an operation.
///
/// The path stays registered unless [`CleanupGuard::success`] is called.
pub struct CleanupGuard {
    ctx: SharedCleanupContext,
    path: PathBuf,
}

impl CleanupGuard {
    pub fn new(ctx: SharedCleanupContext, path: PathBuf) -> Self {
        lock(&ctx).add(path.clone());
        Self { ctx, path }
    }

    /// Mark the operation as finished, unregistering the path.
    pub fn success(self) {
        lock(&self.ctx).remove(&self.path);
    }
}

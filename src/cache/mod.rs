//! On-disk cache of downloaded archives.
//!
//! Layout: `<root>/<component id>/<version>/<asset file>`, next to a
//! `<asset file>.json` sidecar that records what was downloaded. An entry is
//! only trusted when the sidecar, the file on disk and the resolved release
//! all agree.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::download::{part_path, sha256_file};
use crate::resolver::ResolvedRelease;
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub url: String,
    pub size: u64,
    pub sha256: String,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Trusted archive.
    Valid { path: PathBuf, record: CacheRecord },
    /// Nothing cached for this version.
    Missing,
    /// Something is cached but cannot be trusted.
    Stale(String),
}

/// Makes a version or file name safe to use as one path segment.
fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

pub struct ArchiveCache<R: Runtime> {
    runtime: Arc<R>,
    root: PathBuf,
}

impl<R: Runtime + 'static> ArchiveCache<R> {
    pub fn new(runtime: Arc<R>, root: PathBuf) -> Self {
        Self { runtime, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, release: &ResolvedRelease) -> PathBuf {
        self.root
            .join(path_segment(&release.component_id))
            .join(path_segment(&release.version))
            .join(path_segment(&release.asset_name))
    }

    fn sidecar_path(archive: &Path) -> PathBuf {
        let mut name = archive
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".json");
        archive.with_file_name(name)
    }

    /// Checks whether the cached archive for `release` can be reused.
    #[tracing::instrument(skip(self, release), fields(id = %release.component_id, version = %release.version))]
    pub async fn lookup(&self, release: &ResolvedRelease) -> CacheLookup {
        let path = self.archive_path(release);
        if !self.runtime.exists(&path) {
            return CacheLookup::Missing;
        }

        match self.validate(&path, release).await {
            Ok(record) => {
                debug!("Cache hit for {:?}", path);
                CacheLookup::Valid { path, record }
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                debug!("Cache entry {:?} is stale: {}", path, reason);
                CacheLookup::Stale(reason)
            }
        }
    }

    async fn validate(&self, path: &Path, release: &ResolvedRelease) -> Result<CacheRecord> {
        let sidecar = Self::sidecar_path(path);
        let text = self
            .runtime
            .read_to_string(&sidecar)
            .context("missing cache record")?;
        let record: CacheRecord =
            serde_json::from_str(&text).context("unreadable cache record")?;

        let actual_size = self.runtime.file_size(path)?;
        if actual_size != record.size {
            anyhow::bail!(
                "file has {} bytes, record says {}",
                actual_size,
                record.size
            );
        }
        if let Some(expected) = release.size
            && expected != record.size
        {
            anyhow::bail!("release expects {} bytes, record says {}", expected, record.size);
        }
        if let Some(expected) = &release.sha256
            && !expected.eq_ignore_ascii_case(&record.sha256)
        {
            anyhow::bail!("release checksum {} differs from recorded {}", expected, record.sha256);
        }

        let actual = self.hash(path).await?;
        if !actual.eq_ignore_ascii_case(&record.sha256) {
            anyhow::bail!("file checksum {} differs from recorded {}", actual, record.sha256);
        }

        Ok(record)
    }

    /// Writes the sidecar for a freshly downloaded archive.
    pub async fn record(&self, release: &ResolvedRelease, archive: &Path) -> Result<CacheRecord> {
        let record = CacheRecord {
            url: release.download_url.clone(),
            size: self.runtime.file_size(archive)?,
            sha256: self.hash(archive).await?,
            downloaded_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        self.runtime
            .write(&Self::sidecar_path(archive), json.as_bytes())
            .context("Failed to write cache record")?;
        Ok(record)
    }

    /// Removes the cached archive, its record and any partial download.
    pub fn evict(&self, release: &ResolvedRelease) {
        let archive = self.archive_path(release);
        for path in [
            Self::sidecar_path(&archive),
            part_path(&archive),
            archive,
        ] {
            if self.runtime.exists(&path)
                && let Err(e) = self.runtime.remove_file(&path)
            {
                warn!("Failed to remove stale cache file {:?}: {:#}", path, e);
            }
        }
    }

    /// Removes every cached version of the release's component except the
    /// release's own. Returns the number of version directories removed.
    pub fn prune_other_versions(&self, release: &ResolvedRelease) -> usize {
        let component_dir = self.root.join(path_segment(&release.component_id));
        let keep = component_dir.join(path_segment(&release.version));
        if !self.runtime.is_dir(&component_dir) {
            return 0;
        }

        let entries = match self.runtime.read_dir(&component_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list cache directory {:?}: {:#}", component_dir, e);
                return 0;
            }
        };

        let mut removed = 0;
        for dir in entries.into_iter().filter(|p| *p != keep && self.runtime.is_dir(p)) {
            match self.runtime.remove_dir_all(&dir) {
                Ok(()) => {
                    debug!("Pruned old cache entry {:?}", dir);
                    removed += 1;
                }
                Err(e) => warn!("Failed to prune cache entry {:?}: {:#}", dir, e),
            }
        }
        removed
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let runtime = Arc::clone(&self.runtime);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || sha256_file(runtime.as_ref(), &path)).await?
    }
}

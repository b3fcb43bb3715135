//! Install orchestration.
//!
//! Each component runs through `Resolving → Downloading → Extracting →
//! Installed`, or stops at `Failed` carrying the stage it was in. Components
//! are processed concurrently and independently: one failure never aborts
//! the others.

mod events;
mod report;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveExtractor, ExtractOptions};
use crate::cache::{ArchiveCache, CacheLookup};
use crate::cleanup::SharedCleanupContext;
use crate::config::InstallerConfig;
use crate::download::{DownloadRequest, Downloader};
use crate::error::{DownloadError, ExtractionError, InstallError};
use crate::http::HttpClient;
use crate::manifest::{ArchiveFormat, Component};
use crate::resolver::version::versions_match;
use crate::resolver::{ReleaseSource, ResolvedRelease};
use crate::runtime::Runtime;
use crate::state::{InstalledEntry, InstalledState, StateStore};

pub use events::{InstallEvent, NoopReporter, ProgressReporter, Stage};
pub use report::{ComponentResult, ComponentStatus, InstallReport, Outcome, RunSummary};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Reinstall even when the recorded version matches, and ignore the cache.
    pub force: bool,
    /// Restrict the run to these component ids. Empty means all.
    pub only: Vec<String>,
    pub cancel: CancellationToken,
}

pub struct Installer<S: ReleaseSource, R: Runtime> {
    runtime: Arc<R>,
    source: S,
    downloader: Downloader<R>,
    cache: ArchiveCache<R>,
    extractor: Arc<ArchiveExtractor<R>>,
    store: StateStore<R>,
    target_dir: PathBuf,
    concurrency: usize,
    keep_old_downloads: bool,
    reporter: Arc<dyn ProgressReporter>,
}

impl<S: ReleaseSource, R: Runtime + 'static> Installer<S, R> {
    pub fn new(runtime: Arc<R>, source: S, http: HttpClient, config: &InstallerConfig) -> Self {
        Self {
            downloader: Downloader::new(Arc::clone(&runtime), http)
                .with_retry_policy(config.retry.clone())
                .with_progress_interval(config.progress_interval),
            cache: ArchiveCache::new(Arc::clone(&runtime), config.cache_dir.clone()),
            extractor: Arc::new(ArchiveExtractor::new(Arc::clone(&runtime))),
            store: StateStore::new(Arc::clone(&runtime), config.state_path.clone()),
            target_dir: config.target_dir.clone(),
            concurrency: config.concurrency.max(1),
            keep_old_downloads: config.keep_old_downloads,
            reporter: Arc::new(NoopReporter),
            runtime,
            source,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Staging directories get registered here while extracting.
    pub fn with_cleanup(mut self, cleanup: SharedCleanupContext) -> Self {
        self.extractor = Arc::new(ArchiveExtractor::new(Arc::clone(&self.runtime)).with_cleanup(cleanup));
        self
    }

    pub fn state_store(&self) -> &StateStore<R> {
        &self.store
    }

    /// Installs `components`, returning one result per selected component in
    /// the order given.
    #[tracing::instrument(skip_all, fields(components = components.len()))]
    pub async fn install(&self, components: &[Component], options: &InstallOptions) -> InstallReport {
        for id in &options.only {
            if !components.iter().any(|c| &c.id == id) {
                warn!("Unknown component '{}' ignored", id);
            }
        }
        let selected: Vec<&Component> = components
            .iter()
            .filter(|c| options.only.is_empty() || options.only.contains(&c.id))
            .collect();

        let state = Mutex::new(self.store.load());
        for component in &selected {
            self.emit_stage(&component.id, Stage::Pending);
        }

        let state = &state;
        let mut results: Vec<(usize, ComponentResult)> = stream::iter(selected.into_iter().enumerate())
            .map(|(index, component)| async move {
                (index, self.install_component(component, options, state).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let report = InstallReport {
            results: results.into_iter().map(|(_, result)| result).collect(),
        };
        info!(
            "{} component(s) installed, {} failed",
            report.installed(),
            report.failed()
        );
        report
    }

    async fn install_component(
        &self,
        component: &Component,
        options: &InstallOptions,
        state: &Mutex<InstalledState>,
    ) -> ComponentResult {
        let mut stage = Stage::Pending;
        let status = match self.run_pipeline(component, options, state, &mut stage).await {
            Ok(status) => {
                self.emit_stage(&component.id, Stage::Installed);
                status
            }
            Err(error) => {
                warn!("{} failed while {}: {}", component.id, stage, error);
                self.emit_stage(&component.id, Stage::Failed);
                ComponentStatus::Failed { stage, error }
            }
        };
        ComponentResult {
            id: component.id.clone(),
            status,
        }
    }

    async fn run_pipeline(
        &self,
        component: &Component,
        options: &InstallOptions,
        state: &Mutex<InstalledState>,
        stage: &mut Stage,
    ) -> Result<ComponentStatus, InstallError> {
        let id = component.id.as_str();
        let cancel = &options.cancel;

        self.enter(id, stage, Stage::Resolving, cancel)?;
        let release = self.source.resolve(component).await?;
        info!("{} resolves to {} ({})", id, release.version, release.asset_name);

        let previous = state.lock().await.get(id).cloned();
        let cached = if options.force {
            self.cache.evict(&release);
            CacheLookup::Missing
        } else {
            self.cache.lookup(&release).await
        };
        let stale = matches!(cached, CacheLookup::Stale(_));
        if let CacheLookup::Stale(reason) = &cached {
            warn!(
                "Discarding cached archive of {} {}: {}",
                id, release.version, reason
            );
            self.cache.evict(&release);
        }

        if !options.force
            && !stale
            && let Some(entry) = &previous
            && versions_match(&entry.version, &release.version)
        {
            info!("{} {} is up to date", id, entry.version);
            self.prune_cache(&release);
            return Ok(ComponentStatus::Installed {
                version: entry.version.clone(),
                outcome: Outcome::UpToDate,
                files: entry.files,
            });
        }

        self.enter(id, stage, Stage::Downloading, cancel)?;
        let (archive, archive_sha256) = match cached {
            CacheLookup::Valid { path, record } => {
                info!("Reusing cached archive {:?}", path);
                (path, Some(record.sha256))
            }
            _ => self.download(&release, cancel).await?,
        };

        self.enter(id, stage, Stage::Extracting, cancel)?;
        let files = self.extract(component, &release, archive, cancel).await?;

        // A failed state write fails the component at the Installed transition
        *stage = Stage::Installed;
        let entry = InstalledEntry {
            version: release.version.clone(),
            installed_at: Utc::now(),
            archive_sha256,
            files,
        };
        {
            let mut current = state.lock().await;
            let mut next = current.clone();
            next.components.insert(id.to_string(), entry);
            self.store.save(&next)?;
            *current = next;
        }
        self.prune_cache(&release);

        Ok(ComponentStatus::Installed {
            version: release.version,
            outcome: if previous.is_some() {
                Outcome::Updated
            } else {
                Outcome::Fresh
            },
            files,
        })
    }

    async fn download(
        &self,
        release: &ResolvedRelease,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, Option<String>), InstallError> {
        let id = &release.component_id;
        let request = DownloadRequest {
            url: release.download_url.clone(),
            destination: self.cache.archive_path(release),
            expected_size: release.size,
            expected_sha256: release.sha256.clone(),
        };
        let progress = |transferred: u64, total: Option<u64>| {
            self.reporter.report(InstallEvent::Progress {
                id: id.clone(),
                transferred,
                total,
            })
        };

        let path = self
            .downloader
            .fetch(&request, &progress, cancel)
            .await
            .map_err(|e| match e {
                DownloadError::Cancelled => InstallError::Cancelled,
                other => other.into(),
            })?;

        let sha256 = match self.cache.record(release, &path).await {
            Ok(record) => Some(record.sha256),
            Err(e) => {
                warn!("Failed to record cache entry for {:?}: {:#}", path, e);
                release.sha256.clone()
            }
        };
        Ok((path, sha256))
    }

    async fn extract(
        &self,
        component: &Component,
        release: &ResolvedRelease,
        archive: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<usize, InstallError> {
        let target = self.target_dir.join(&component.install_path);
        let options = ExtractOptions {
            format: component
                .format
                .or_else(|| ArchiveFormat::from_file_name(&release.asset_name)),
            unwrap: component.unwrap,
        };
        debug!("Extracting {:?} into {:?} with {:?}", archive, target, options);

        let extractor = Arc::clone(&self.extractor);
        let cancel = cancel.clone();
        let task_archive = archive.clone();
        let installed = tokio::task::spawn_blocking(move || {
            extractor.extract(&task_archive, &target, options, &cancel)
        })
        .await
        .map_err(|e| ExtractionError::Io {
            path: archive,
            reason: e.to_string(),
        })?
        .map_err(|e| match e {
            ExtractionError::Cancelled => InstallError::Cancelled,
            other => other.into(),
        })?;
        Ok(installed.len())
    }

    fn prune_cache(&self, release: &ResolvedRelease) {
        if !self.keep_old_downloads {
            let removed = self.cache.prune_other_versions(release);
            if removed > 0 {
                info!("Removed {} old cached version(s) of {}", removed, release.component_id);
            }
        }
    }

    fn enter(
        &self,
        id: &str,
        current: &mut Stage,
        next: Stage,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        *current = next;
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        self.emit_stage(id, next);
        Ok(())
    }

    fn emit_stage(&self, id: &str, stage: Stage) {
        debug!("{}: {}", id, stage);
        self.reporter.report(InstallEvent::Stage {
            id: id.to_string(),
            stage,
        });
    }
}

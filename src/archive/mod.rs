//! Archive extraction into an install target.
//!
//! Entries are unpacked into a staging directory next to the target, an
//! optional single wrapper directory is stripped, and the result is merged
//! into the target with overwrite semantics. Staging is always removed
//! afterwards; a merge that fails halfway is not rolled back.

mod layout;
mod sevenz;
mod zip;

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::error::ExtractionError;
use crate::manifest::ArchiveFormat;
use crate::runtime::Runtime;

pub use sevenz::SevenZUnpacker;
pub use zip::ZipUnpacker;

use layout::{content_root, io_error, merge_into};

/// Format-specific unpacking of every entry into a directory.
pub trait Unpacker: Send + Sync {
    fn format(&self) -> ArchiveFormat;

    /// Writes all entries below `staging`, returning the number of files.
    /// Entries escaping `staging` are skipped. Checks `cancel` between entries.
    fn unpack(
        &self,
        runtime: &dyn Runtime,
        archive_path: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<usize, ExtractionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// `None` detects the format from the archive's extension.
    pub format: Option<ArchiveFormat>,
    pub unwrap: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            format: None,
            unwrap: true,
        }
    }
}

static STAGING_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Unique staging directory beside `target`, so the final moves are renames
/// on the same filesystem.
fn staging_dir(target: &Path) -> Result<PathBuf, ExtractionError> {
    let parent = target.parent().ok_or_else(|| ExtractionError::Io {
        path: target.to_path_buf(),
        reason: "install target has no parent directory".to_string(),
    })?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(".{}.staging-{}-{}", name, std::process::id(), seq)))
}

/// Dispatcher that selects the appropriate unpacker based on archive format.
pub struct ArchiveExtractor<R: Runtime> {
    runtime: Arc<R>,
    unpackers: Vec<Box<dyn Unpacker>>,
    cleanup: Option<SharedCleanupContext>,
}

impl<R: Runtime + 'static> ArchiveExtractor<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            unpackers: vec![Box::new(ZipUnpacker), Box::new(SevenZUnpacker)],
            cleanup: None,
        }
    }

    /// Registers staging directories for removal on interruption.
    pub fn with_cleanup(mut self, cleanup: SharedCleanupContext) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    fn unpacker(&self, format: ArchiveFormat) -> Option<&dyn Unpacker> {
        self.unpackers
            .iter()
            .find(|u| u.format() == format)
            .map(|u| u.as_ref())
    }

    /// Extracts `archive_path` into `target`. Blocking.
    ///
    /// Returns the installed file paths relative to `target`.
    #[tracing::instrument(skip(self, cancel))]
    pub fn extract(
        &self,
        archive_path: &Path,
        target: &Path,
        options: ExtractOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        let format = options
            .format
            .or_else(|| ArchiveFormat::from_path(archive_path))
            .ok_or_else(|| {
                ExtractionError::UnsupportedFormat(archive_path.display().to_string())
            })?;
        let unpacker = self
            .unpacker(format)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(format.to_string()))?;

        let runtime: &dyn Runtime = self.runtime.as_ref();
        let staging = staging_dir(target)?;
        if runtime.exists(&staging) {
            runtime
                .remove_dir_all(&staging)
                .map_err(|e| io_error(&staging, &e))?;
        }
        runtime
            .create_dir_all(&staging)
            .map_err(|e| io_error(&staging, &e))?;
        let guard = self
            .cleanup
            .as_ref()
            .map(|ctx| CleanupGuard::new(Arc::clone(ctx), staging.clone()));

        debug!("Staging {:?} in {:?}", archive_path, staging);
        let result = unpacker
            .unpack(runtime, archive_path, &staging, cancel)
            .and_then(|_| content_root(runtime, &staging, options.unwrap))
            .and_then(|root| merge_into(runtime, &root, target));

        if let Err(e) = runtime.remove_dir_all(&staging) {
            warn!("Failed to remove staging directory {:?}: {:#}", staging, e);
        } else if let Some(guard) = guard {
            guard.success();
        }

        let installed = result?;
        info!(
            "Extracted {} file(s) from {:?} into {:?}",
            installed.len(),
            archive_path,
            target
        );
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup;
    use crate::runtime::RealRuntime;
    use ::zip::ZipWriter;
    use ::zip::write::SimpleFileOptions;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn create_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    fn extractor() -> ArchiveExtractor<RealRuntime> {
        ArchiveExtractor::new(Arc::new(RealRuntime))
    }

    fn no_staging_left(parent: &Path) -> bool {
        fs::read_dir(parent)
            .unwrap()
            .all(|e| !e.unwrap().file_name().to_string_lossy().contains(".staging-"))
    }

    #[test]
    fn test_single_wrapper_directory_is_stripped() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let archive = dir.path().join("OBS-Studio-30.2.0-Windows.zip");
        let target = dir.path().join("obs");
        create_zip(
            &archive,
            &[
                ("OBS-Studio-30.2.0/", ""),
                ("OBS-Studio-30.2.0/bin/64bit/obs64.exe", "exe"),
                ("OBS-Studio-30.2.0/data/obs-studio/themes/Yami.obt", "theme"),
            ],
        );

        // --- Execute ---
        let mut installed = extractor()
            .extract(&archive, &target, ExtractOptions::default(), &CancellationToken::new())
            .unwrap();
        installed.sort();

        // --- Verify ---
        assert!(target.join("bin/64bit/obs64.exe").is_file());
        assert!(!target.join("OBS-Studio-30.2.0").exists());
        assert_eq!(
            installed,
            vec![
                PathBuf::from("bin/64bit/obs64.exe"),
                PathBuf::from("data/obs-studio/themes/Yami.obt"),
            ]
        );
        assert!(no_staging_left(dir.path()));
    }

    #[test]
    fn test_wrapper_kept_when_unwrap_disabled() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("plugin.zip");
        let target = dir.path().join("obs");
        create_zip(&archive, &[("obs-plugins/64bit/plugin.dll", "dll")]);

        let options = ExtractOptions {
            format: None,
            unwrap: false,
        };
        extractor()
            .extract(&archive, &target, options, &CancellationToken::new())
            .unwrap();

        assert!(target.join("obs-plugins/64bit/plugin.dll").is_file());
    }

    #[test]
    fn test_plugin_archive_keeps_obs_plugins_level() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("plugin-y.zip");
        let target = dir.path().join("obs");
        create_zip(
            &archive,
            &[
                ("obs-plugins/", ""),
                ("obs-plugins/64bit/plugin-y.dll", "dll"),
            ],
        );

        let installed = extractor()
            .extract(&archive, &target, ExtractOptions::default(), &CancellationToken::new())
            .unwrap();

        assert_eq!(installed, vec![PathBuf::from("obs-plugins/64bit/plugin-y.dll")]);
        assert!(target.join("obs-plugins/64bit/plugin-y.dll").is_file());
        assert!(!target.join("64bit").exists());
    }

    #[test]
    fn test_seven_zip_wrapper_is_stripped_and_overwrites() {
        // --- Setup: a 7z with a wrapper dir, and an older install in place ---
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join("ndi-plugin/obs-plugins/64bit")).unwrap();
        fs::create_dir_all(source.join("ndi-plugin/data")).unwrap();
        fs::write(source.join("ndi-plugin/obs-plugins/64bit/ndi.dll"), "v2").unwrap();
        fs::write(source.join("ndi-plugin/data/a.ini"), "ini").unwrap();
        let archive = dir.path().join("ndi-plugin.7z");
        sevenz_rust::compress_to_path(&source, &archive).unwrap();

        let target = dir.path().join("obs");
        fs::create_dir_all(target.join("obs-plugins/64bit")).unwrap();
        fs::write(target.join("obs-plugins/64bit/ndi.dll"), "v1").unwrap();

        // --- Execute ---
        let mut installed = extractor()
            .extract(&archive, &target, ExtractOptions::default(), &CancellationToken::new())
            .unwrap();
        installed.sort();

        // --- Verify ---
        assert_eq!(
            installed,
            vec![PathBuf::from("data/a.ini"), PathBuf::from("obs-plugins/64bit/ndi.dll")]
        );
        assert_eq!(fs::read_to_string(target.join("obs-plugins/64bit/ndi.dll")).unwrap(), "v2");
        assert!(!target.join("ndi-plugin").exists());
        assert!(no_staging_left(dir.path()));
    }

    #[test]
    fn test_repeated_extraction_is_idempotent() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("plugin.zip");
        let target = dir.path().join("obs");
        create_zip(&archive, &[("plugin/obs-plugins/64bit/plugin.dll", "v2")]);
        fs::create_dir_all(target.join("obs-plugins/64bit")).unwrap();
        fs::write(target.join("obs-plugins/64bit/plugin.dll"), "v1").unwrap();

        for _ in 0..2 {
            extractor()
                .extract(&archive, &target, ExtractOptions::default(), &CancellationToken::new())
                .unwrap();
        }

        assert_eq!(
            fs::read_to_string(target.join("obs-plugins/64bit/plugin.dll")).unwrap(),
            "v2"
        );
        assert_eq!(fs::read_dir(target.join("obs-plugins/64bit")).unwrap().count(), 1);
    }

    #[test]
    fn test_explicit_format_overrides_extension() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("download.bin");
        let target = dir.path().join("obs");
        create_zip(&archive, &[("a.txt", "a"), ("b.txt", "b")]);

        let options = ExtractOptions {
            format: Some(ArchiveFormat::Zip),
            unwrap: true,
        };
        let installed = extractor()
            .extract(&archive, &target, options, &CancellationToken::new())
            .unwrap();
        assert_eq!(installed.len(), 2);
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempdir().unwrap();
        let err = extractor()
            .extract(
                &dir.path().join("plugin.tar.gz"),
                &dir.path().join("obs"),
                ExtractOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        create_zip(&archive, &[]);

        let err = extractor()
            .extract(&archive, &dir.path().join("obs"), ExtractOptions::default(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Empty(_)));
        assert!(no_staging_left(dir.path()));
    }

    #[test]
    fn test_corrupt_archive_cleans_staging() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, "garbage").unwrap();

        let ctx = cleanup::new_shared();
        let err = ArchiveExtractor::new(Arc::new(RealRuntime))
            .with_cleanup(Arc::clone(&ctx))
            .extract(&archive, &dir.path().join("obs"), ExtractOptions::default(), &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Corrupt { .. }));
        assert!(no_staging_left(dir.path()));
        assert!(cleanup::lock(&ctx).is_empty());
    }

    #[test]
    fn test_staging_dirs_are_unique() {
        let target = Path::new("/opt/obs");
        let a = staging_dir(target).unwrap();
        let b = staging_dir(target).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(Path::new("/opt")));
    }
}

use log::debug;
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use super::Unpacker;
use super::layout::{io_error, safe_relative};
use crate::error::ExtractionError;
use crate::manifest::ArchiveFormat;
use crate::runtime::Runtime;

/// Unpacker for .zip archives
pub struct ZipUnpacker;

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Copies one entry, reporting read failures as a corrupt archive and write
/// failures against the destination path.
fn copy_entry<W: Write + ?Sized>(
    entry: &mut impl Read,
    dest: &mut W,
    archive_path: &Path,
    dest_path: &Path,
) -> Result<(), ExtractionError> {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(corrupt(archive_path, e)),
        };
        dest.write_all(&buf[..n])
            .map_err(|e| io_error(dest_path, &e.into()))?;
    }
}

impl Unpacker for ZipUnpacker {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn unpack(
        &self,
        runtime: &dyn Runtime,
        archive_path: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<usize, ExtractionError> {
        debug!("Unpacking zip archive {:?} into {:?}", archive_path, staging);

        // zip needs Read + Seek; Runtime::open only gives Read
        let mut buffer = Vec::new();
        runtime
            .open(archive_path)
            .map_err(|e| io_error(archive_path, &e))?
            .read_to_end(&mut buffer)
            .map_err(|e| io_error(archive_path, &e.into()))?;

        let mut archive =
            ZipArchive::new(Cursor::new(buffer)).map_err(|e| corrupt(archive_path, e))?;

        let mut written = 0;
        for i in 0..archive.len() {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            let mut entry = archive.by_index(i).map_err(|e| corrupt(archive_path, e))?;

            let Some(relative) = entry
                .enclosed_name()
                .and_then(|p| p.to_str().and_then(safe_relative))
            else {
                debug!("Skipping entry with unsafe path: {}", entry.name());
                continue;
            };
            let full_path = staging.join(&relative);

            if entry.is_dir() {
                runtime
                    .create_dir_all(&full_path)
                    .map_err(|e| io_error(&full_path, &e))?;
                continue;
            }

            if let Some(parent) = full_path.parent() {
                runtime
                    .create_dir_all(parent)
                    .map_err(|e| io_error(parent, &e))?;
            }
            let mut dest_file = runtime
                .create_file(&full_path)
                .map_err(|e| io_error(&full_path, &e))?;
            copy_entry(&mut entry, &mut dest_file, archive_path, &full_path)?;
            written += 1;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode()
                && let Err(e) = runtime.set_permissions(&full_path, mode)
            {
                debug!("Failed to set permissions on {:?}: {}", full_path, e);
            }
        }

        Ok(written)
    }
}

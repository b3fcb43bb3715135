use log::debug;
use sevenz_rust::{Password, SevenZReader};
use std::io::{Cursor, Read};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::Unpacker;
use super::layout::{io_error, safe_relative};
use crate::error::ExtractionError;
use crate::manifest::ArchiveFormat;
use crate::runtime::Runtime;

/// Unpacker for .7z archives
pub struct SevenZUnpacker;

impl Unpacker for SevenZUnpacker {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZ
    }

    fn unpack(
        &self,
        runtime: &dyn Runtime,
        archive_path: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<usize, ExtractionError> {
        debug!("Unpacking 7z archive {:?} into {:?}", archive_path, staging);

        let mut buffer = Vec::new();
        runtime
            .open(archive_path)
            .map_err(|e| io_error(archive_path, &e))?
            .read_to_end(&mut buffer)
            .map_err(|e| io_error(archive_path, &e.into()))?;
        let len = buffer.len() as u64;

        let corrupt = |reason: String| ExtractionError::Corrupt {
            path: archive_path.to_path_buf(),
            reason,
        };

        let mut reader = SevenZReader::new(Cursor::new(buffer), len, Password::empty())
            .map_err(|e| corrupt(e.to_string()))?;

        // The entry callback can only report sevenz errors, so ours are parked here
        let mut failure: Option<ExtractionError> = None;
        let mut written = 0;

        reader
            .for_each_entries(|entry, data| {
                if cancel.is_cancelled() {
                    failure = Some(ExtractionError::Cancelled);
                    return Ok(false);
                }

                let Some(relative) = safe_relative(entry.name()) else {
                    debug!("Skipping entry with unsafe path: {}", entry.name());
                    return Ok(true);
                };
                let full_path = staging.join(&relative);

                let result = if entry.is_directory() {
                    runtime
                        .create_dir_all(&full_path)
                        .map_err(|e| io_error(&full_path, &e))
                } else {
                    write_entry(runtime, &full_path, data, entry.has_stream())
                        .map(|_| written += 1)
                };

                match result {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        failure = Some(e);
                        Ok(false)
                    }
                }
            })
            .map_err(|e| corrupt(e.to_string()))?;

        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

fn write_entry(
    runtime: &dyn Runtime,
    full_path: &Path,
    data: &mut dyn Read,
    has_stream: bool,
) -> Result<(), ExtractionError> {
    if let Some(parent) = full_path.parent() {
        runtime
            .create_dir_all(parent)
            .map_err(|e| io_error(parent, &e))?;
    }
    let mut dest_file = runtime
        .create_file(full_path)
        .map_err(|e| io_error(full_path, &e))?;
    if has_stream {
        std::io::copy(data, &mut dest_file).map_err(|e| io_error(full_path, &e.into()))?;
    }
    Ok(())
}

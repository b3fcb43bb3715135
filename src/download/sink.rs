//! Part-file writer that hands the blocking writes to tokio's blocking pool.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::io_error;
use crate::error::DownloadError;

/// Bytes gathered before a write is handed off.
const FLUSH_THRESHOLD: usize = 1024 * 1024;

pub(super) struct PartWriter {
    path: PathBuf,
    writer: Option<Box<dyn Write + Send>>,
    buffer: Vec<u8>,
}

impl PartWriter {
    pub(super) fn new(path: &Path, writer: Box<dyn Write + Send>) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            buffer: Vec::with_capacity(FLUSH_THRESHOLD),
        }
    }

    pub(super) async fn push(&mut self, bytes: &[u8]) -> Result<(), DownloadError> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.drain(false).await?;
        }
        Ok(())
    }

    /// Writes out everything buffered and flushes the file.
    pub(super) async fn finish(&mut self) -> Result<(), DownloadError> {
        self.drain(true).await
    }

    async fn drain(&mut self, flush: bool) -> Result<(), DownloadError> {
        let Some(mut writer) = self.writer.take() else {
            return Err(DownloadError::Io {
                path: self.path.clone(),
                reason: "an earlier write to this file failed".to_string(),
            });
        };
        let data = std::mem::take(&mut self.buffer);

        let written = tokio::task::spawn_blocking(move || {
            writer.write_all(&data)?;
            if flush {
                writer.flush()?;
            }
            Ok::<_, std::io::Error>((writer, data))
        })
        .await;

        match written {
            Ok(Ok((writer, mut data))) => {
                data.clear();
                self.buffer = data;
                self.writer = Some(writer);
                Ok(())
            }
            Ok(Err(e)) => Err(io_error(&self.path, &e.into())),
            Err(e) => Err(io_error(&self.path, &e.into())),
        }
    }
}

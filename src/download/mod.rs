//! Resumable, retrying archive downloads.
//!
//! Bytes are streamed into `<destination>.part`. A later attempt (or a later
//! run) continues from the part file's length with an HTTP range request, and
//! the part file is only renamed to its final name once it has been verified.

mod hash;
mod sink;

use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, chain};
use crate::http::{HttpClient, RetryPolicy, classify_status};
use crate::runtime::Runtime;

pub use hash::sha256_file;
use sink::PartWriter;

/// Default minimum time between two progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Receives `(bytes_transferred, total_bytes)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// What to fetch and how to verify it.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_sha256: Option<String>,
}

/// Path of the in-progress file for a destination.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Outcome of a single attempt that did not complete.
enum AttemptError {
    Transient(String),
    Fatal(DownloadError),
}

pub struct Downloader<R: Runtime> {
    runtime: Arc<R>,
    http: HttpClient,
    retry: RetryPolicy,
    progress_interval: Duration,
}

impl<R: Runtime + 'static> Downloader<R> {
    pub fn new(runtime: Arc<R>, http: HttpClient) -> Self {
        let retry = http.retry_policy().clone();
        Self {
            runtime,
            http,
            retry,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Downloads `request.url` to `request.destination`.
    ///
    /// A size mismatch after a complete transfer discards the part file and
    /// runs one more full retry cycle. A checksum mismatch fails immediately.
    #[tracing::instrument(skip(self, request, progress, cancel), fields(url = %request.url))]
    pub async fn fetch(
        &self,
        request: &DownloadRequest,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let destination = &request.destination;
        let part = part_path(destination);
        if let Some(parent) = destination.parent() {
            self.runtime
                .create_dir_all(parent)
                .map_err(|e| io_error(parent, &e))?;
        }

        info!("Downloading {} to {:?}", request.url, destination);

        let mut size_retry_used = false;
        loop {
            let len = self.fetch_with_retry(request, &part, progress, cancel).await?;
            match request.expected_size {
                Some(expected) if len != expected => {
                    self.discard(&part);
                    if size_retry_used {
                        return Err(DownloadError::SizeMismatch {
                            expected,
                            actual: len,
                        });
                    }
                    warn!(
                        "Downloaded {} bytes but expected {}, starting over",
                        len, expected
                    );
                    size_retry_used = true;
                }
                _ => break,
            }
        }

        if let Some(expected) = &request.expected_sha256 {
            let actual = self.hash(&part).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                self.discard(&part);
                return Err(DownloadError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            debug!("Checksum verified: {}", actual);
        }

        self.runtime
            .rename(&part, destination)
            .map_err(|e| io_error(destination, &e))?;

        info!("Download complete: {:?}", destination);
        Ok(destination.clone())
    }

    /// One retry cycle: up to `max_attempts` attempts with backoff in between.
    async fn fetch_with_retry(
        &self,
        request: &DownloadRequest,
        part: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let attempts = self.retry.attempts();
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            match self.attempt(request, part, progress, cancel).await {
                Ok(len) => return Ok(len),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(reason)) => {
                    last_reason = reason;
                    if attempt < attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            "Download attempt {}/{} failed ({}), retrying in {}ms...",
                            attempt,
                            attempts,
                            last_reason,
                            delay.as_millis()
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        }
                    }
                }
            }
        }

        Err(DownloadError::Transport {
            attempts,
            reason: last_reason,
        })
    }

    /// A single HTTP request, resuming from the part file when it exists.
    async fn attempt(
        &self,
        request: &DownloadRequest,
        part: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, AttemptError> {
        let url = request.url.as_str();
        let offset = if self.runtime.exists(part) {
            self.runtime.file_size(part).unwrap_or(0)
        } else {
            0
        };

        let mut builder = self.http.inner().get(url);
        if offset > 0 {
            debug!("Resuming {} from byte {}", url, offset);
            builder = builder.header(RANGE, format!("bytes={}-", offset));
        }

        let mut response = tokio::select! {
            result = builder.send() => result.map_err(|e| AttemptError::Transient(chain(&e.into())))?,
            _ = cancel.cancelled() => return Err(AttemptError::Fatal(DownloadError::Cancelled)),
        };

        let status = response.status();
        let (writer, mut transferred) = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                let writer = self
                    .runtime
                    .open_append(part)
                    .map_err(|e| AttemptError::Fatal(io_error(part, &e)))?;
                (writer, offset)
            }
            s if s.is_success() => {
                if offset > 0 {
                    debug!("Server ignored the range request, restarting {}", url);
                }
                let writer = self
                    .runtime
                    .create_file(part)
                    .map_err(|e| AttemptError::Fatal(io_error(part, &e)))?;
                (writer, 0)
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                self.discard(part);
                return Err(AttemptError::Transient(
                    "requested range not satisfiable, restarting from zero".to_string(),
                ));
            }
            s => {
                return Err(match classify_status(s, url) {
                    Ok(()) => AttemptError::Transient(format!("HTTP {}", s.as_u16())),
                    Err(_) => AttemptError::Fatal(DownloadError::Http {
                        status: s.as_u16(),
                        url: url.to_string(),
                    }),
                });
            }
        };

        let total = total_size(&response, transferred).or(request.expected_size);
        let mut writer = PartWriter::new(part, writer);
        let mut last_report = Instant::now();

        loop {
            if cancel.is_cancelled() {
                let _ = writer.finish().await;
                debug!("Download of {} cancelled at byte {}", url, transferred);
                return Err(AttemptError::Fatal(DownloadError::Cancelled));
            }

            let chunk = tokio::select! {
                chunk = response.chunk() => chunk,
                _ = cancel.cancelled() => continue,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    writer.push(&bytes).await.map_err(AttemptError::Fatal)?;
                    transferred += bytes.len() as u64;
                    if last_report.elapsed() >= self.progress_interval {
                        progress(transferred, total);
                        last_report = Instant::now();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = writer.finish().await;
                    return Err(AttemptError::Transient(chain(&e.into())));
                }
            }
        }

        writer.finish().await.map_err(AttemptError::Fatal)?;
        progress(transferred, total.or(Some(transferred)));

        debug!(
            "Downloaded {:.2} MB from {}",
            transferred as f64 / (1024.0 * 1024.0),
            url
        );
        Ok(transferred)
    }

    async fn hash(&self, path: &Path) -> Result<String, DownloadError> {
        let runtime = Arc::clone(&self.runtime);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || sha256_file(runtime.as_ref(), &owned))
            .await
            .map_err(|e| io_error(path, &e.into()))?
            .map_err(|e| io_error(path, &e))
    }

    fn discard(&self, part: &Path) {
        if self.runtime.exists(part)
            && let Err(e) = self.runtime.remove_file(part)
        {
            warn!("Failed to remove {:?}: {:#}", part, e);
        }
    }
}

/// Full size of the remote file, as far as the response tells.
fn total_size(response: &reqwest::Response, offset: u64) -> Option<u64> {
    if response.status() == StatusCode::PARTIAL_CONTENT {
        // Content-Range: bytes 100-199/200
        let from_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, total)| total.trim().parse::<u64>().ok());
        return from_range.or_else(|| response.content_length().map(|len| len + offset));
    }
    response.content_length()
}

fn io_error(path: &Path, err: &anyhow::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        reason: chain(err),
    }
}

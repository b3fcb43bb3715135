//! Typed error taxonomy for the install pipeline.
//!
//! Internal plumbing works with `anyhow::Result`; these enums are what the
//! pipeline stages hand back to callers so that failures can be matched on.
//! Wrapped causes are stored as rendered strings (`{:#}` of the anyhow chain).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    #[error("Failed to load manifest from {location}: {reason}")]
    Load { location: String, reason: String },

    #[error("Malformed manifest: {0}")]
    Parse(String),

    #[error("Component at index {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Component '{id}' has an invalid {field}: {reason}")]
    InvalidValue {
        id: String,
        field: &'static str,
        reason: String,
    },

    #[error("Duplicate component id '{0}'")]
    DuplicateId(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Source {locator} is unreachable: {reason}")]
    Unreachable { locator: String, reason: String },

    #[error("Invalid source locator '{0}', expected 'owner/repo'")]
    InvalidLocator(String),

    #[error("No eligible release found for {locator}")]
    NoRelease { locator: String },

    #[error("No asset of {locator} matches '{pattern}'")]
    NoMatchingAsset { locator: String, pattern: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    #[error("HTTP {status} while downloading {url}")]
    Http { status: u16, url: String },

    #[error("Download failed after {attempts} attempt(s): {reason}")]
    Transport { attempts: usize, reason: String },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("I/O error at {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Download cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt archive {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Archive {0:?} is empty")]
    Empty(PathBuf),

    #[error("Failed to write {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Extraction cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Failed to read installed state {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Installed state {path:?} is corrupt: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Failed to write installed state {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Failure of a single component; never aborts the others.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstallError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Cancelled")]
    Cancelled,
}

/// Renders an anyhow chain on one line.
pub(crate) fn chain(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

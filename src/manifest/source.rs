use log::{debug, info};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::Manifest;
use crate::error::{ManifestError, chain};
use crate::http::HttpClient;
use crate::runtime::Runtime;

/// Where to read the manifest from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Url(String),
    Path(PathBuf),
}

impl FromStr for ManifestSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(ManifestSource::Url(s.to_string()))
        } else {
            Ok(ManifestSource::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestSource::Url(url) => write!(f, "{}", url),
            ManifestSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fetches (with retry) or reads the manifest, then parses it.
#[tracing::instrument(skip(runtime, http))]
pub async fn load_manifest<R: Runtime>(
    source: &ManifestSource,
    runtime: &R,
    http: &HttpClient,
) -> Result<Manifest, ManifestError> {
    info!("Loading manifest from {}", source);

    let text = match source {
        ManifestSource::Url(url) => http.get_text(url).await,
        ManifestSource::Path(path) => runtime.read_to_string(path),
    }
    .map_err(|e| ManifestError::Load {
        location: source.to_string(),
        reason: chain(&e),
    })?;

    let manifest = Manifest::parse(&text)?;
    debug!("Manifest lists {} component(s)", manifest.len());
    Ok(manifest)
}

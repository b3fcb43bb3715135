//! Release resolution: which version of a component to install and where to get it.

mod direct;
mod github;
mod page;
pub mod version;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;
use crate::manifest::{Component, SourceKind};

pub use direct::DirectUrlSource;
pub use github::GitHubSource;
pub use page::DownloadPageSource;

/// A downloadable asset attached to a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    pub download_url: String,
    /// `sha256:<hex>` as reported by GitHub, when available.
    pub digest: Option<String>,
}

impl ReleaseAsset {
    /// The SHA-256 part of the digest, lowercase.
    pub fn sha256(&self) -> Option<String> {
        self.digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
            .map(|hex| hex.to_lowercase())
    }
}

/// The concrete release chosen for a component.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelease {
    pub component_id: String,
    pub version: String,
    pub download_url: String,
    pub asset_name: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Anything that can resolve a component to a release.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn resolve(&self, component: &Component) -> Result<ResolvedRelease, ResolutionError>;
}

/// Dispatches on the component's source kind.
pub struct VersionResolver {
    github: GitHubSource,
    direct: DirectUrlSource,
    page: DownloadPageSource,
}

impl VersionResolver {
    pub fn new(github: GitHubSource, direct: DirectUrlSource, page: DownloadPageSource) -> Self {
        Self {
            github,
            direct,
            page,
        }
    }
}

#[async_trait]
impl ReleaseSource for VersionResolver {
    async fn resolve(&self, component: &Component) -> Result<ResolvedRelease, ResolutionError> {
        match component.source_kind {
            SourceKind::GitHub => self.github.resolve(component).await,
            SourceKind::DirectUrl => self.direct.resolve(component).await,
            SourceKind::DownloadPage => self.page.resolve(component).await,
        }
    }
}

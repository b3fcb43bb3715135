use anyhow::{Context, Result};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

use crate::asset::Platform;
use crate::download::DEFAULT_PROGRESS_INTERVAL;
use crate::http::{HttpClient, RetryPolicy};
use crate::manifest::ManifestSource;
use crate::resolver::{DirectUrlSource, DownloadPageSource, GitHubSource, VersionResolver};
use crate::runtime::Runtime;

pub const APP_DIR: &str = "obs-installer";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Everything a run needs, passed explicitly to the pipeline.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub target_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub state_path: PathBuf,
    pub manifest: ManifestSource,
    pub token: Option<String>,
    pub api_url: String,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
    pub platform: Platform,
    /// Keep archives of superseded versions in the cache.
    pub keep_old_downloads: bool,
}

/// `<config dir>/obs-installer/state.json`
pub fn default_state_path(runtime: &dyn Runtime) -> Result<PathBuf> {
    let base = runtime
        .config_dir()
        .or_else(|| runtime.home_dir().map(|h| h.join(".config")))
        .context("Could not determine a configuration directory")?;
    Ok(base.join(APP_DIR).join("state.json"))
}

/// `<cache dir>/obs-installer/downloads`
pub fn default_cache_dir(runtime: &dyn Runtime) -> Result<PathBuf> {
    let base = runtime
        .cache_dir()
        .or_else(|| runtime.home_dir().map(|h| h.join(".cache")))
        .context("Could not determine a cache directory")?;
    Ok(base.join(APP_DIR).join("downloads"))
}

impl InstallerConfig {
    /// Defaults for everything but the manifest and the target directory.
    pub fn new(runtime: &dyn Runtime, manifest: ManifestSource, target_dir: PathBuf) -> Result<Self> {
        let config = Self {
            target_dir,
            cache_dir: default_cache_dir(runtime)?,
            state_path: default_state_path(runtime)?,
            manifest,
            token: runtime.env_var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
            api_url: DEFAULT_API_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            platform: Platform::default(),
            keep_old_downloads: false,
        };
        debug!("Default configuration: {:?}", config.redacted());
        Ok(config)
    }

    /// Copy safe to log.
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_deref().map(crate::http::mask_token),
            ..self.clone()
        }
    }

    /// Client for downloads, direct URLs and manifests. Never carries the token.
    pub fn http_client(&self) -> Result<HttpClient> {
        HttpClient::from_config(self)
    }

    /// Client for the GitHub API, the only place the token is sent.
    pub fn github_client(&self) -> Result<HttpClient> {
        HttpClient::github_from_config(self)
    }

    /// Resolver whose GitHub source authenticates while every other source
    /// uses the anonymous `http` client.
    pub fn resolver(&self, http: &HttpClient) -> Result<VersionResolver> {
        Ok(VersionResolver::new(
            GitHubSource::new(self.github_client()?, &self.api_url, self.platform.clone()),
            DirectUrlSource::new(http.clone()),
            DownloadPageSource::new(http.clone(), self.platform.clone())?,
        ))
    }
}

pub fn user_agent() -> String {
    format!("{}/{}", APP_DIR, env!("OBS_INSTALLER_VERSION"))
}

impl HttpClient {
    pub fn from_config(config: &InstallerConfig) -> Result<Self> {
        Ok(Self::with_token(&user_agent(), None)?.with_retry_policy(config.retry.clone()))
    }

    pub fn github_from_config(config: &InstallerConfig) -> Result<Self> {
        Ok(Self::with_token(&user_agent(), config.token.as_deref())?
            .with_retry_policy(config.retry.clone()))
    }
}

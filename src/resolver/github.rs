//! GitHub releases source.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::cmp::Ordering;

use super::version::{compare_versions, versions_match};
use super::{ReleaseAsset, ReleaseSource, ResolvedRelease};
use crate::asset::{AssetPicker, DefaultAssetPicker, PatternAssetPicker, Platform};
use crate::error::{ResolutionError, chain};
use crate::http::HttpClient;
use crate::manifest::Component;

const PER_PAGE: usize = 100;

// 1000 releases is far beyond any OBS plugin's history
const MAX_PAGES: usize = 10;

/// GitHub API response types (internal).
mod api {
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct Release {
        pub tag_name: String,
        #[serde(default)]
        pub draft: bool,
        #[serde(default)]
        pub prerelease: bool,
        pub published_at: Option<DateTime<Utc>>,
        #[serde(default)]
        pub assets: Vec<Asset>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Asset {
        pub name: String,
        #[serde(default)]
        pub size: u64,
        pub browser_download_url: String,
        pub digest: Option<String>,
    }
}

impl From<api::Asset> for ReleaseAsset {
    fn from(a: api::Asset) -> Self {
        ReleaseAsset {
            name: a.name,
            size: a.size,
            download_url: a.browser_download_url,
            digest: a.digest,
        }
    }
}

/// Splits `owner/repo`.
fn parse_repo(locator: &str) -> Result<(&str, &str), ResolutionError> {
    let locator = locator.trim().trim_end_matches('/');
    match locator.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            let (owner, repo) = (*owner, *repo);
            Ok((owner, repo.trim_end_matches(".git")))
        }
        _ => Err(ResolutionError::InvalidLocator(locator.to_string())),
    }
}

pub struct GitHubSource {
    http: HttpClient,
    api_url: String,
    platform: Platform,
}

impl GitHubSource {
    pub fn new(http: HttpClient, api_url: &str, platform: Platform) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            platform,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn fetch_releases(&self, owner: &str, repo: &str) -> Result<Vec<api::Release>> {
        let url = format!("{}/repos/{}/{}/releases", self.api_url, owner, repo);
        let per_page = PER_PAGE.to_string();
        let mut releases = Vec::new();

        for page in 1..=MAX_PAGES {
            debug!("Fetching releases page {} from {}...", page, url);
            let page_str = page.to_string();
            let parsed: Vec<api::Release> = self
                .http
                .get_json_with_query(&url, &[("per_page", &per_page), ("page", &page_str)])
                .await?;

            let last_page = parsed.len() < PER_PAGE;
            releases.extend(parsed);
            if last_page {
                break;
            }
        }

        Ok(releases)
    }

    fn picker(&self, component: &Component) -> Result<Box<dyn AssetPicker>, ResolutionError> {
        match &component.asset_pattern {
            Some(pattern) => {
                let picker = PatternAssetPicker::new(pattern).map_err(|_| {
                    ResolutionError::NoMatchingAsset {
                        locator: component.source_locator.clone(),
                        pattern: pattern.clone(),
                    }
                })?;
                Ok(Box::new(picker))
            }
            None => Ok(Box::new(DefaultAssetPicker::with_platform(
                self.platform.clone(),
            ))),
        }
    }
}

/// Newest first: semantic version, then publish time.
fn compare_releases(a: &api::Release, b: &api::Release) -> Ordering {
    compare_versions(&a.tag_name, &b.tag_name).then_with(|| a.published_at.cmp(&b.published_at))
}

#[async_trait]
impl ReleaseSource for GitHubSource {
    #[tracing::instrument(skip(self, component), fields(id = %component.id))]
    async fn resolve(&self, component: &Component) -> Result<ResolvedRelease, ResolutionError> {
        let locator = &component.source_locator;
        let (owner, repo) = parse_repo(locator)?;

        let releases = self
            .fetch_releases(owner, repo)
            .await
            .map_err(|e| ResolutionError::Unreachable {
                locator: locator.clone(),
                reason: chain(&e),
            })?;

        let eligible: Vec<api::Release> = releases
            .into_iter()
            .filter(|r| !r.draft)
            .filter(|r| component.prerelease || !r.prerelease)
            .filter(|r| match &component.version {
                Some(pinned) => versions_match(&r.tag_name, pinned),
                None => true,
            })
            .collect();

        if eligible.is_empty() {
            return Err(ResolutionError::NoRelease {
                locator: locator.clone(),
            });
        }

        let picker = self.picker(component)?;
        let (release, asset) = eligible
            .into_iter()
            .filter_map(|mut release| {
                let assets: Vec<ReleaseAsset> =
                    release.assets.drain(..).map(ReleaseAsset::from).collect();
                let asset = picker.pick(&assets).cloned()?;
                Some((release, asset))
            })
            .max_by(|(a, _), (b, _)| compare_releases(a, b))
            .ok_or_else(|| ResolutionError::NoMatchingAsset {
                locator: locator.clone(),
                pattern: component
                    .asset_pattern
                    .clone()
                    .unwrap_or_else(|| format!("any {} archive", self.platform)),
            })?;

        info!(
            "Resolved {} to {} ({})",
            component.id, release.tag_name, asset.name
        );

        Ok(ResolvedRelease {
            component_id: component.id.clone(),
            version: release.tag_name.clone(),
            sha256: component.sha256.clone().or_else(|| asset.sha256()),
            size: component.size.or(Some(asset.size).filter(|s| *s > 0)),
            download_url: asset.download_url,
            asset_name: asset.name,
            published_at: release.published_at,
        })
    }
}

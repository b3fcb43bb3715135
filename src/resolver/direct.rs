//! Direct URL source: a fixed archive location, versioned by its HTTP validators.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{CONTENT_LENGTH, ETAG, HeaderMap, LAST_MODIFIED};

use super::{ReleaseSource, ResolvedRelease};
use crate::error::{ResolutionError, chain};
use crate::http::HttpClient;
use crate::manifest::Component;

/// Version reported when the server offers no validator at all.
pub const UNVERSIONED: &str = "unversioned";

pub struct DirectUrlSource {
    http: HttpClient,
}

impl DirectUrlSource {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `W/"abc"` -> `abc`
fn clean_etag(etag: &str) -> String {
    etag.trim_start_matches("W/").trim_matches('"').to_string()
}

/// Last path segment of the URL, without query or fragment.
fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_string)
}

#[async_trait]
impl ReleaseSource for DirectUrlSource {
    #[tracing::instrument(skip(self, component), fields(id = %component.id))]
    async fn resolve(&self, component: &Component) -> Result<ResolvedRelease, ResolutionError> {
        let url = &component.source_locator;
        let headers = self
            .http
            .head(url)
            .await
            .map_err(|e| ResolutionError::Unreachable {
                locator: url.clone(),
                reason: chain(&e),
            })?;

        let version = component
            .version
            .clone()
            .or_else(|| header_str(&headers, ETAG).map(clean_etag))
            .or_else(|| header_str(&headers, LAST_MODIFIED).map(str::to_string))
            .unwrap_or_else(|| UNVERSIONED.to_string());

        let size = component.size.or_else(|| {
            header_str(&headers, CONTENT_LENGTH)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|s| *s > 0)
        });

        let asset_name = file_name_from_url(url).unwrap_or_else(|| {
            let ext = component
                .format
                .map(|f| f.to_string())
                .unwrap_or_else(|| "zip".to_string());
            format!("{}.{}", component.id, ext)
        });
        debug!("{} -> {} (size {:?})", url, asset_name, size);
        info!("Resolved {} to {}", component.id, version);

        Ok(ResolvedRelease {
            component_id: component.id.clone(),
            version,
            download_url: url.clone(),
            asset_name,
            size,
            sha256: component.sha256.clone(),
            published_at: None,
        })
    }
}

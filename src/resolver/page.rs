//! Download page source: a web page listing archive links, such as the
//! `/download` page of an obsproject.com forum resource.
//!
//! Forum pages put each file name in a `contentRow-title` element that
//! follows its download button. Other pages are scanned for plain links whose
//! target or text is an archive file name.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use reqwest::Url;

use super::{ReleaseAsset, ReleaseSource, ResolvedRelease};
use crate::asset::{AssetPicker, DefaultAssetPicker, PatternAssetPicker, Platform};
use crate::error::{ResolutionError, chain};
use crate::http::HttpClient;
use crate::manifest::{ArchiveFormat, Component};

const DOWNLOAD_BUTTON_CLASS: &str = "button--icon--download";

struct LinkScanner {
    anchor: Regex,
    title: Regex,
    href: Regex,
    class: Regex,
    tag: Regex,
    dotted_version: Regex,
}

impl LinkScanner {
    fn new() -> Result<Self> {
        Ok(Self {
            anchor: Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>")?,
            title: Regex::new(
                r#"(?is)<[a-z0-9]+\b[^>]*\bclass\s*=\s*["'][^"']*\bcontentRow-title\b[^"']*["'][^>]*>(.*?)</[a-z0-9]+\s*>"#,
            )?,
            href: Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            class: Regex::new(r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            tag: Regex::new(r"<[^>]*>")?,
            dotted_version: Regex::new(r"\d+(?:\.\d+)+")?,
        })
    }

    fn attribute(re: &Regex, attrs: &str) -> Option<String> {
        let caps = re.captures(attrs)?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| decode_entities(m.as_str()))
    }

    fn text(&self, html: &str) -> String {
        decode_entities(self.tag.replace_all(html, "").trim())
    }

    /// Archive links on `html`, forum file entries first, in page order.
    fn scan(&self, html: &str, page: &Url) -> Vec<ReleaseAsset> {
        struct Anchor {
            start: usize,
            href: String,
            text: String,
            download_button: bool,
        }

        let anchors: Vec<Anchor> = self
            .anchor
            .captures_iter(html)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let attrs = caps.get(1).map_or("", |m| m.as_str());
                let href = Self::attribute(&self.href, attrs)?;
                let download_button = Self::attribute(&self.class, attrs)
                    .is_some_and(|class| class.split_whitespace().any(|c| c == DOWNLOAD_BUTTON_CLASS));
                Some(Anchor {
                    start: whole.start(),
                    href,
                    text: self.text(caps.get(2).map_or("", |m| m.as_str())),
                    download_button,
                })
            })
            .collect();

        let mut assets: Vec<ReleaseAsset> = Vec::new();
        let mut push = |name: String, href: &str| {
            let Ok(url) = page.join(href) else {
                debug!("Skipping unresolvable link {}", href);
                return;
            };
            let url = url.to_string();
            if assets.iter().any(|a| a.download_url == url) {
                return;
            }
            assets.push(ReleaseAsset {
                name,
                size: 0,
                download_url: url,
                digest: None,
            });
        };

        for caps in self.title.captures_iter(html) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = self.text(inner.as_str());
            let button = anchors
                .iter()
                .rev()
                .find(|a| a.download_button && a.start < whole.start());
            match button {
                Some(button) if !name.is_empty() => push(name, &button.href),
                _ => debug!("No download button before file entry '{}'", name),
            }
        }

        for anchor in &anchors {
            let name = if ArchiveFormat::from_file_name(&anchor.text).is_some() {
                anchor.text.clone()
            } else {
                match link_file_name(&anchor.href) {
                    Some(name) if ArchiveFormat::from_file_name(&name).is_some() => name,
                    _ => continue,
                }
            };
            push(name, &anchor.href);
        }

        assets
    }

    /// Version of a page download: a dotted version in the file name, else
    /// the forum's file id, else the file name itself.
    fn version_of(&self, asset: &ReleaseAsset) -> String {
        if let Some(found) = self.dotted_version.find(&asset.name) {
            return found.as_str().to_string();
        }
        Url::parse(&asset.download_url)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "file")
                    .map(|(_, id)| format!("file-{}", id))
            })
            .unwrap_or_else(|| asset.name.clone())
    }
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Last path segment of a possibly relative link, without query or fragment.
fn link_file_name(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next()?;
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct DownloadPageSource {
    http: HttpClient,
    platform: Platform,
    scanner: LinkScanner,
}

impl DownloadPageSource {
    pub fn new(http: HttpClient, platform: Platform) -> Result<Self> {
        Ok(Self {
            http,
            platform,
            scanner: LinkScanner::new()?,
        })
    }

    fn pick(&self, component: &Component, mut assets: Vec<ReleaseAsset>) -> Option<ReleaseAsset> {
        match &component.asset_pattern {
            Some(pattern) => {
                // ProgramData builds install outside the OBS tree
                assets.sort_by_key(|a| a.name.to_lowercase().contains("programdata"));
                PatternAssetPicker::new(pattern).ok()?.pick(&assets).cloned()
            }
            None => DefaultAssetPicker::with_platform(self.platform.clone())
                .pick(&assets)
                .cloned(),
        }
    }
}

#[async_trait]
impl ReleaseSource for DownloadPageSource {
    #[tracing::instrument(skip(self, component), fields(id = %component.id))]
    async fn resolve(&self, component: &Component) -> Result<ResolvedRelease, ResolutionError> {
        let locator = &component.source_locator;
        let page = Url::parse(locator)
            .map_err(|_| ResolutionError::InvalidLocator(locator.clone()))?;

        let html = self
            .http
            .get_text(locator)
            .await
            .map_err(|e| ResolutionError::Unreachable {
                locator: locator.clone(),
                reason: chain(&e),
            })?;

        let assets = self.scanner.scan(&html, &page);
        debug!(
            "Found {} archive link(s) on {}: {:?}",
            assets.len(),
            locator,
            assets.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
        );
        if assets.is_empty() {
            return Err(ResolutionError::NoRelease {
                locator: locator.clone(),
            });
        }

        let asset = self
            .pick(component, assets)
            .ok_or_else(|| ResolutionError::NoMatchingAsset {
                locator: locator.clone(),
                pattern: component
                    .asset_pattern
                    .clone()
                    .unwrap_or_else(|| format!("any {} archive", self.platform)),
            })?;

        let version = component
            .version
            .clone()
            .unwrap_or_else(|| self.scanner.version_of(&asset));
        info!("Resolved {} to {} ({})", component.id, version, asset.name);

        Ok(ResolvedRelease {
            component_id: component.id.clone(),
            version,
            download_url: asset.download_url,
            asset_name: asset.name,
            size: component.size,
            sha256: component.sha256.clone(),
            published_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use crate::manifest::SourceKind;

    const FORUM_PAGE: &str = r#"
<div class="block-body">
  <div class="block-row block-row--separated">
    <div class="contentRow">
      <div class="contentRow-extra">
        <a href="/forum/resources/move.913/download?file=98765&amp;hash=x"
           class="button--icon--download button--icon button"><span class="button-text">Download</span></a>
      </div>
      <div class="contentRow-main">
        <h3 class="contentRow-title">move-transition-3.1.2-programdata.zip</h3>
      </div>
    </div>
  </div>
  <div class="block-row block-row--separated">
    <div class="contentRow">
      <div class="contentRow-extra">
        <a href="/forum/resources/move.913/download?file=98766"
           class="button--icon--download button--icon button"><span class="button-text">Download</span></a>
      </div>
      <div class="contentRow-main">
        <h3 class="contentRow-title">move-transition-3.1.2-windows.zip</h3>
      </div>
    </div>
  </div>
  <a href="/forum/help/terms">Terms</a>
</div>
"#;

    fn source() -> DownloadPageSource {
        let http =
            HttpClient::new(reqwest::Client::new()).with_retry_policy(RetryPolicy::immediate(1));
        DownloadPageSource::new(http, Platform::windows_x64()).unwrap()
    }

    fn page_component(url: String, pattern: Option<&str>) -> Component {
        let mut component = Component::new("move-transition", SourceKind::DownloadPage, url);
        component.asset_pattern = pattern.map(str::to_string);
        component
    }

    #[test]
    fn test_scan_forum_entries() {
        let page = Url::parse("https://obsproject.com/forum/resources/move.913/download").unwrap();
        let assets = LinkScanner::new().unwrap().scan(FORUM_PAGE, &page);

        let found: Vec<(&str, &str)> = assets
            .iter()
            .map(|a| (a.name.as_str(), a.download_url.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                (
                    "move-transition-3.1.2-programdata.zip",
                    "https://obsproject.com/forum/resources/move.913/download?file=98765&hash=x"
                ),
                (
                    "move-transition-3.1.2-windows.zip",
                    "https://obsproject.com/forum/resources/move.913/download?file=98766"
                ),
            ]
        );
    }

    #[test]
    fn test_scan_plain_links() {
        let html = r#"<ul>
            <li><a href="files/source-clone-0.2.1-windows.7z">Windows</a></li>
            <li><a href='https://cdn.example.com/dl?id=7'>source-clone-0.2.1-macos.zip</a></li>
            <li><a href="changelog.html">Changelog</a></li>
        </ul>"#;
        let page = Url::parse("https://example.com/plugins/source-clone/").unwrap();
        let assets = LinkScanner::new().unwrap().scan(html, &page);

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].name, "source-clone-0.2.1-windows.7z");
        assert_eq!(
            assets[0].download_url,
            "https://example.com/plugins/source-clone/files/source-clone-0.2.1-windows.7z"
        );
        assert_eq!(assets[1].name, "source-clone-0.2.1-macos.zip");
        assert_eq!(assets[1].download_url, "https://cdn.example.com/dl?id=7");
    }

    #[test]
    fn test_version_of_link() {
        let scanner = LinkScanner::new().unwrap();
        let asset = |name: &str, url: &str| ReleaseAsset {
            name: name.into(),
            size: 0,
            download_url: url.into(),
            digest: None,
        };

        assert_eq!(
            scanner.version_of(&asset("move-transition-3.1.2-windows.zip", "https://x/d?file=1")),
            "3.1.2"
        );
        assert_eq!(
            scanner.version_of(&asset("move-transition-windows.zip", "https://x/d?file=98766")),
            "file-98766"
        );
        assert_eq!(
            scanner.version_of(&asset("plugin.zip", "https://x/plugin.zip")),
            "plugin.zip"
        );
    }

    #[tokio::test]
    async fn test_resolve_forum_page_by_pattern() {
        // --- Setup ---
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/forum/resources/move.913/download")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(FORUM_PAGE)
            .create_async()
            .await;

        // --- Execute ---
        let component = page_component(
            format!("{}/forum/resources/move.913/download", server.url()),
            Some("move-transition-*.zip"),
        );
        let resolved = source().resolve(&component).await.unwrap();

        // --- Verify: the standard build wins over the ProgramData one ---
        mock.assert_async().await;
        assert_eq!(resolved.asset_name, "move-transition-3.1.2-windows.zip");
        assert_eq!(
            resolved.download_url,
            format!("{}/forum/resources/move.913/download?file=98766", server.url())
        );
        assert_eq!(resolved.version, "3.1.2");
        assert_eq!(resolved.size, None);
    }

    #[tokio::test]
    async fn test_resolve_pinned_version_without_pattern() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/download")
            .with_status(200)
            .with_body(FORUM_PAGE)
            .create_async()
            .await;

        let mut component = page_component(format!("{}/download", server.url()), None);
        component.version = Some("3.1.2-r1".into());
        let resolved = source().resolve(&component).await.unwrap();

        assert_eq!(resolved.asset_name, "move-transition-3.1.2-windows.zip");
        assert_eq!(resolved.version, "3.1.2-r1");
    }

    #[tokio::test]
    async fn test_resolve_without_matching_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/download")
            .with_status(200)
            .with_body(FORUM_PAGE)
            .create_async()
            .await;

        let component =
            page_component(format!("{}/download", server.url()), Some("*-linux.tar.xz"));
        let err = source().resolve(&component).await.unwrap_err();
        assert!(matches!(err, ResolutionError::NoMatchingAsset { .. }));
    }

    #[tokio::test]
    async fn test_resolve_page_without_archives() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/download")
            .with_status(200)
            .with_body("<html><body><a href=\"/login\">Log in</a></body></html>")
            .create_async()
            .await;

        let component = page_component(format!("{}/download", server.url()), None);
        let err = source().resolve(&component).await.unwrap_err();
        assert!(matches!(err, ResolutionError::NoRelease { .. }));
    }

    #[tokio::test]
    async fn test_resolve_unreachable_page() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/download")
            .with_status(403)
            .create_async()
            .await;

        let component = page_component(format!("{}/download", server.url()), None);
        let err = source().resolve(&component).await.unwrap_err();
        assert!(matches!(err, ResolutionError::Unreachable { .. }));
    }
}

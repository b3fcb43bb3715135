use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ManifestError;

/// Where a component's releases come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[serde(rename = "github")]
    GitHub,
    DirectUrl,
    /// A web page listing archive links, like an OBS forum download page.
    DownloadPage,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::GitHub => write!(f, "github"),
            SourceKind::DirectUrl => write!(f, "direct_url"),
            SourceKind::DownloadPage => write!(f, "download_page"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(SourceKind::GitHub),
            "direct_url" | "url" => Ok(SourceKind::DirectUrl),
            "download_page" | "page" => Ok(SourceKind::DownloadPage),
            other => Err(format!(
                "unknown source kind '{}', expected github, direct_url or download_page",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "7z")]
    SevenZ,
}

impl ArchiveFormat {
    /// Detects the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".7z") {
            Some(ArchiveFormat::SevenZ)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::from_file_name)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::SevenZ => write!(f, "7z"),
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "7z" | "7zip" => Ok(ArchiveFormat::SevenZ),
            other => Err(format!("unsupported archive format '{}'", other)),
        }
    }
}

/// One installable unit: OBS Studio or a plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub source_kind: SourceKind,
    /// `owner/repo` for GitHub, an http(s) URL otherwise.
    pub source_locator: String,
    /// Relative to the install target; empty means the target itself.
    pub install_path: PathBuf,
    /// `None` means detect from the asset file name.
    pub format: Option<ArchiveFormat>,
    /// Glob matched case-insensitively against release asset names.
    pub asset_pattern: Option<String>,
    /// Pinned release tag or version.
    pub version: Option<String>,
    /// Expected archive digest, lowercase hex.
    pub sha256: Option<String>,
    pub size: Option<u64>,
    pub prerelease: bool,
    /// Strip a single top-level wrapper directory on extraction.
    pub unwrap: bool,
}

impl Component {
    /// Minimal component, mostly useful for building manifests in code.
    pub fn new(
        id: impl Into<String>,
        source_kind: SourceKind,
        source_locator: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source_kind,
            source_locator: source_locator.into(),
            install_path: PathBuf::new(),
            format: None,
            asset_pattern: None,
            version: None,
            sha256: None,
            size: None,
            prerelease: false,
            unwrap: true,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub(super) struct RawComponent {
    id: Option<String>,
    name: Option<String>,
    source_kind: Option<String>,
    source_locator: Option<String>,
    install_path: Option<String>,
    format: Option<String>,
    asset_pattern: Option<String>,
    version: Option<String>,
    sha256: Option<String>,
    size: Option<u64>,
    prerelease: Option<bool>,
    unwrap: Option<bool>,
}

fn required(value: Option<String>, index: usize, field: &'static str) -> Result<String, ManifestError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ManifestError::MissingField { index, field })
}

fn is_http_url(locator: &str) -> bool {
    let lower = locator.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Accepts `/` and `\` separators; rejects anything rooted or climbing out.
fn sanitize_install_path(raw: &str) -> Result<PathBuf, String> {
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(format!("'{}' must be relative to the install target", raw));
    }

    let mut path = PathBuf::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(format!("'{}' escapes the install target", raw)),
            s if s.contains(':') => {
                return Err(format!("'{}' must be relative to the install target", raw));
            }
            s => path.push(s),
        }
    }
    Ok(path)
}

impl RawComponent {
    pub(super) fn validate(self, index: usize) -> Result<Component, ManifestError> {
        let id = required(self.id, index, "id")?;
        let source_locator = required(self.source_locator, index, "source_locator")?;
        let install_path = required(self.install_path, index, "install_path")?;

        let invalid = |field: &'static str, reason: String| ManifestError::InvalidValue {
            id: id.clone(),
            field,
            reason,
        };

        let source_kind = match self.source_kind.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => {
                kind.parse::<SourceKind>()
                    .map_err(|e| invalid("source_kind", e))?
            }
            _ if is_http_url(&source_locator) => SourceKind::DirectUrl,
            _ => SourceKind::GitHub,
        };

        if source_kind != SourceKind::GitHub && !is_http_url(&source_locator) {
            return Err(invalid(
                "source_locator",
                format!("'{}' is not an http(s) URL", source_locator),
            ));
        }

        let install_path =
            sanitize_install_path(&install_path).map_err(|e| invalid("install_path", e))?;

        let format = self
            .format
            .as_deref()
            .map(str::parse::<ArchiveFormat>)
            .transpose()
            .map_err(|e| invalid("format", e))?;

        if let Some(pattern) = &self.asset_pattern {
            glob::Pattern::new(pattern).map_err(|e| invalid("asset_pattern", e.to_string()))?;
        }

        let sha256 = match self.sha256 {
            Some(digest) => {
                let digest = digest.trim().to_lowercase();
                let digest = digest.strip_prefix("sha256:").unwrap_or(&digest).to_string();
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid(
                        "sha256",
                        "expected 64 hexadecimal characters".to_string(),
                    ));
                }
                Some(digest)
            }
            None => None,
        };

        Ok(Component {
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| id.clone()),
            id,
            source_kind,
            source_locator,
            install_path,
            format,
            asset_pattern: self.asset_pattern,
            version: self.version.filter(|v| !v.trim().is_empty()),
            sha256,
            size: self.size,
            prerelease: self.prerelease.unwrap_or(false),
            unwrap: self.unwrap.unwrap_or(true),
        })
    }
}

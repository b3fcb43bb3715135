use glob::{MatchOptions, Pattern};

use super::Platform;
use crate::manifest::ArchiveFormat;
use crate::resolver::ReleaseAsset;

/// Trait for selecting an asset from a list of available assets
pub trait AssetPicker: Send + Sync {
    /// Pick the most appropriate asset from the given list
    ///
    /// Returns `None` if no suitable asset is found
    fn pick<'a>(&self, assets: &'a [ReleaseAsset]) -> Option<&'a ReleaseAsset>;
}

const OS_MARKERS: &[&str] = &[
    "windows", "linux", "ubuntu", "macos", "darwin", "osx", ".deb", ".dmg", ".pkg",
];

/// Default asset picker: extractable archives ranked by platform fit.
pub struct DefaultAssetPicker {
    platform: Platform,
}

impl DefaultAssetPicker {
    pub fn new() -> Self {
        Self::with_platform(Platform::default())
    }

    pub fn with_platform(platform: Platform) -> Self {
        Self { platform }
    }

    fn mentions_other_os(&self, name_lower: &str) -> bool {
        let own = self.platform.os_aliases();
        OS_MARKERS
            .iter()
            .any(|marker| name_lower.contains(marker) && !own.contains(marker))
    }

    /// Score an asset for ranking (higher is better)
    fn score_asset(&self, name: &str) -> i32 {
        let name_lower = name.to_lowercase();
        let mut score = 0;

        match ArchiveFormat::from_file_name(&name_lower) {
            Some(ArchiveFormat::Zip) => score += 10,
            Some(ArchiveFormat::SevenZ) => score += 9,
            None => score -= 1000,
        }

        if self
            .platform
            .os_aliases()
            .iter()
            .any(|alias| name_lower.contains(alias))
        {
            score += 20;
        }
        if self
            .platform
            .arch_aliases()
            .iter()
            .any(|alias| name_lower.contains(alias))
        {
            score += 15;
        }

        // Debug symbols, installers and the ProgramData layout are not the portable bundle
        for marker in ["pdb", "debug", "symbols", "installer", "setup"] {
            if name_lower.contains(marker) {
                score -= 50;
            }
        }
        if name_lower.contains("programdata") {
            score -= 5;
        }

        if name_lower.contains("sha256")
            || name_lower.contains("checksum")
            || name_lower.ends_with(".sig")
            || name_lower.ends_with(".asc")
        {
            score -= 100;
        }

        if name_lower.contains("source") || name_lower.contains("src") {
            score -= 50;
        }

        score
    }
}

impl Default for DefaultAssetPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetPicker for DefaultAssetPicker {
    fn pick<'a>(&self, assets: &'a [ReleaseAsset]) -> Option<&'a ReleaseAsset> {
        let mut candidates: Vec<_> = assets
            .iter()
            .filter(|a| ArchiveFormat::from_file_name(&a.name).is_some())
            .filter(|a| !self.mentions_other_os(&a.name.to_lowercase()))
            .collect();

        // Stable sort keeps release order among equal scores
        candidates.sort_by_key(|a| std::cmp::Reverse(self.score_asset(&a.name)));
        candidates.into_iter().next()
    }
}

/// Picks the first asset whose name matches a glob, ignoring case.
pub struct PatternAssetPicker {
    pattern: Pattern,
}

impl PatternAssetPicker {
    pub fn new(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
        })
    }

    fn matches(&self, name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.pattern.matches_with(name, options)
    }
}

impl AssetPicker for PatternAssetPicker {
    fn pick<'a>(&self, assets: &'a [ReleaseAsset]) -> Option<&'a ReleaseAsset> {
        assets.iter().find(|a| self.matches(&a.name))
    }
}

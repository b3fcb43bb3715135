//! Typed model of the component manifest.
//!
//! The manifest is an ordered list of components (OBS Studio itself and its
//! plugins). It is immutable once loaded.

mod component;
mod source;

use serde::Deserialize;
use std::collections::HashSet;

use crate::error::ManifestError;

pub use component::{ArchiveFormat, Component, SourceKind};
pub use source::{ManifestSource, load_manifest};

use component::RawComponent;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    components: Vec<Component>,
}

/// Either a bare array of components or `{ "components": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawManifest {
    List(Vec<serde_json::Value>),
    Wrapped { components: Vec<serde_json::Value> },
}

impl Manifest {
    /// Parses and validates a JSON manifest document.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(text).map_err(|e| {
            ManifestError::Parse(format!(
                "expected a JSON array of components or an object with 'components': {}",
                e
            ))
        })?;
        let values = match raw {
            RawManifest::List(values) | RawManifest::Wrapped { components: values } => values,
        };

        let mut seen = HashSet::new();
        let mut components = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            let raw: RawComponent = serde_json::from_value(value)
                .map_err(|e| ManifestError::Parse(format!("component at index {}: {}", index, e)))?;
            let component = raw.validate(index)?;
            if !seen.insert(component.id.clone()) {
                return Err(ManifestError::DuplicateId(component.id));
            }
            components.push(component);
        }

        Ok(Self { components })
    }

    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn get(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"[
        {
            "id": "obs-studio",
            "name": "OBS Studio",
            "source_kind": "github",
            "source_locator": "obsproject/obs-studio",
            "install_path": ".",
            "format": "zip",
            "asset_pattern": "OBS-Studio-*-Windows-x64.zip"
        },
        {
            "id": "move-transition",
            "source_locator": "exeldro/obs-move-transition",
            "install_path": "obs-plugins/",
            "unwrap": false,
            "homepage": "https://obsproject.com/forum/resources/move.913/"
        },
        {
            "id": "ndi",
            "source_locator": "https://example.com/ndi/distroav-windows.7z",
            "install_path": "."
        }
    ]"#;

    #[test]
    fn test_parse_keeps_manifest_order() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let ids: Vec<_> = manifest.ids().collect();
        assert_eq!(ids, vec!["obs-studio", "move-transition", "ndi"]);
    }

    #[test]
    fn test_parse_fills_defaults_and_infers_kind() {
        let manifest = Manifest::parse(SAMPLE).unwrap();

        let obs = manifest.get("obs-studio").unwrap();
        assert_eq!(obs.name, "OBS Studio");
        assert_eq!(obs.source_kind, SourceKind::GitHub);
        assert_eq!(obs.format, Some(ArchiveFormat::Zip));
        assert_eq!(obs.install_path, PathBuf::new());
        assert!(obs.unwrap);
        assert!(!obs.prerelease);

        let transition = manifest.get("move-transition").unwrap();
        assert_eq!(transition.name, "move-transition");
        assert_eq!(transition.install_path, PathBuf::from("obs-plugins"));
        assert!(!transition.unwrap);
        assert_eq!(transition.format, None);

        let ndi = manifest.get("ndi").unwrap();
        assert_eq!(ndi.source_kind, SourceKind::DirectUrl);
    }

    #[test]
    fn test_parse_wrapped_object() {
        let manifest = Manifest::parse(
            r#"{"version": 2, "components": [
                {"id": "a", "source_locator": "o/a", "install_path": "."}
            ]}"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 1);
        assert!(manifest.get("missing").is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = Manifest::parse("[{").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));

        let err = Manifest::parse(r#"{"plugins": []}"#).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn test_parse_reports_missing_field_with_index() {
        let err = Manifest::parse(
            r#"[
                {"id": "a", "source_locator": "o/a", "install_path": "."},
                {"id": "b", "source_locator": "o/b"}
            ]"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ManifestError::MissingField {
                index: 1,
                field: "install_path"
            }
        );

        let err = Manifest::parse(r#"[{"source_locator": "o/a", "install_path": "."}]"#)
            .unwrap_err();
        assert_eq!(
            err,
            ManifestError::MissingField {
                index: 0,
                field: "id"
            }
        );
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let err = Manifest::parse(
            r#"[
                {"id": "a", "source_locator": "o/a", "install_path": "."},
                {"id": "a", "source_locator": "o/b", "install_path": "."}
            ]"#,
        )
        .unwrap_err();
        assert_eq!(err, ManifestError::DuplicateId("a".into()));
    }

    #[test]
    fn test_parse_rejects_wrongly_typed_field() {
        let err = Manifest::parse(
            r#"[{"id": 7, "source_locator": "o/a", "install_path": "."}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Parse(msg) if msg.contains("index 0")));
    }

    #[test]
    fn test_empty_manifest_is_valid() {
        let manifest = Manifest::parse("[]").unwrap();
        assert!(manifest.is_empty());
    }
}

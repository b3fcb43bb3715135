//! Release version ordering.
//!
//! Tags are compared as semantic versions where possible. Parsing is lenient:
//! a leading `v` is ignored and missing minor/patch components count as zero,
//! so `v30.2` orders like `30.2.0`.

use semver::Version;
use std::cmp::Ordering;

fn strip_v(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

/// Parses a release tag into a semantic version.
pub fn parse_lenient(tag: &str) -> Option<Version> {
    let tag = strip_v(tag);
    let split = tag.find(['-', '+']).unwrap_or(tag.len());
    let (core, suffix) = tag.split_at(split);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    Version::parse(&format!("{}{}", padded, suffix)).ok()
}

/// Orders two tags: parseable versions by semver, above unparseable ones,
/// which fall back to plain string order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => strip_v(a).cmp(strip_v(b)),
    }
}

/// Check if two version strings match.
///
/// Handles the 'v' prefix flexibly (e.g., "v1.0.0" matches "1.0.0").
pub fn versions_match(v1: &str, v2: &str) -> bool {
    strip_v(v1) == strip_v(v2)
}

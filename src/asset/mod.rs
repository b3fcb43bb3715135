//! Asset selection module
//!
//! Chooses which archive of a GitHub release to download: either the asset
//! matching the component's glob pattern, or the best platform match.

mod picker;
mod platform;

pub use picker::{AssetPicker, DefaultAssetPicker, PatternAssetPicker};
pub use platform::Platform;

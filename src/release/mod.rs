//! Application release check against GitHub.

mod checker;
mod version_compare;

pub use checker::{
    ReleaseAsset, ReleaseChecker, ReleaseError, ReleaseInfo, DEFAULT_API_BASE,
    DEFAULT_ASSET_EXTENSION, DEFAULT_CDN_BASE,
};
pub use version_compare::{compare_versions, is_newer, normalize_tag};

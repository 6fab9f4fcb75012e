//! Storage keys for an asset's thumbnails.
//!
//! The layout is read by the image proxy and must not change:
//!
//! | Object | Key |
//! |---|---|
//! | manifest | `{c}/{s}/{a}/s.json` |
//! | largest legacy render | `{c}/{s}/{a}/low.jpg` |
//! | legacy confined render | `{c}/{s}/{a}/full/{w},{h}/0/default.jpg` |
//! | derivative | `{c}/{s}/{a}/{open,auth}/{longEdge}.jpg` |
//! | deprecated flat derivative | `{c}/{s}/{a}/{longEdge}.jpg` |
//! | deprecated manifest | `{c}/{s}/{a}/sizes.json` |

use crate::models::{
    asset::AssetId, manifest::AccessLevel, object::ObjectLocation, size::Size,
};
use regex::Regex;

pub const SIZES_JSON_KEY: &str = "s.json";
pub const LEGACY_SIZES_JSON_KEY: &str = "sizes.json";
pub const LARGEST_THUMB_KEY: &str = "low.jpg";

/// Recognises legacy object names relative to an asset root.
///
/// Built once at startup and shared; holds the compiled patterns.
#[derive(Debug, Clone)]
pub struct LegacyKeyMatcher {
    confined_render: Regex,
    bounded_thumb: Regex,
}

impl LegacyKeyMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            confined_render: Regex::new(r"^full/(\d+),(\d+)/0/default\.jpg$")?,
            bounded_thumb: Regex::new(r"^([0-9]+)\.jpg$")?,
        })
    }

    /// Size of a legacy `full/{w},{h}/0/default.jpg` render. Width-only
    /// renders (`full/{w},/...`) are not matched.
    pub fn confined_render_size(&self, relative_key: &str) -> Option<Size> {
        let caps = self.confined_render.captures(relative_key)?;
        let width = caps[1].parse().ok()?;
        let height = caps[2].parse().ok()?;
        Some(Size::new(width, height))
    }

    /// Long edge of a flat `{n}.jpg` derivative.
    pub fn flat_thumbnail_edge(&self, relative_key: &str) -> Option<u32> {
        let caps = self.bounded_thumb.captures(relative_key)?;
        caps[1].parse().ok()
    }

    /// Flat `{n}.jpg` derivatives and the old `sizes.json` manifest.
    pub fn is_deprecated(&self, relative_key: &str) -> bool {
        self.bounded_thumb.is_match(relative_key) || relative_key == LEGACY_SIZES_JSON_KEY
    }
}

/// Key generator for the thumbs bucket.
#[derive(Debug, Clone)]
pub struct ThumbnailKeys {
    bucket: String,
    matcher: LegacyKeyMatcher,
}

impl ThumbnailKeys {
    pub fn new(bucket: impl Into<String>, matcher: LegacyKeyMatcher) -> Self {
        Self {
            bucket: bucket.into(),
            matcher,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn matcher(&self) -> &LegacyKeyMatcher {
        &self.matcher
    }

    fn location(&self, key: String) -> ObjectLocation {
        ObjectLocation::new(self.bucket.clone(), key)
    }

    /// Prefix under which every object for the asset lives, with trailing `/`.
    pub fn root(&self, asset_id: &AssetId) -> ObjectLocation {
        self.location(format!("{asset_id}/"))
    }

    pub fn sizes_json(&self, asset_id: &AssetId) -> ObjectLocation {
        self.location(format!("{asset_id}/{SIZES_JSON_KEY}"))
    }

    pub fn largest_legacy(&self, asset_id: &AssetId) -> ObjectLocation {
        self.location(format!("{asset_id}/{LARGEST_THUMB_KEY}"))
    }

    pub fn legacy_thumbnail(&self, asset_id: &AssetId, size: Size) -> ObjectLocation {
        self.location(format!(
            "{asset_id}/full/{},{}/0/default.jpg",
            size.width, size.height
        ))
    }

    pub fn flat_thumbnail(&self, asset_id: &AssetId, longest_edge: u32) -> ObjectLocation {
        self.location(format!("{asset_id}/{longest_edge}.jpg"))
    }

    pub fn thumbnail(&self, asset_id: &AssetId, longest_edge: u32, access: AccessLevel) -> ObjectLocation {
        self.location(format!("{asset_id}/{}/{longest_edge}.jpg", access.slug()))
    }

    /// Strip the asset root from a listed key. Keys outside the root yield
    /// `None`.
    pub fn relative<'a>(&self, asset_id: &AssetId, key: &'a str) -> Option<&'a str> {
        let root = format!("{asset_id}/");
        key.strip_prefix(root.as_str())
    }
}

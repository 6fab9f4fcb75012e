//! The `s.json` completion manifest.
//!
//! Its JSON form `{"o":[[w,h],...],"a":[[w,h],...]}` is read by the image
//! proxy, so field names and ordering are fixed.

use crate::models::size::Size;
use serde::{Deserialize, Serialize};

/// Storage access bucket for a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Open,
    Auth,
}

impl AccessLevel {
    /// Key segment under the asset root: `open` or `auth`.
    pub fn slug(&self) -> &'static str {
        match self {
            AccessLevel::Open => "open",
            AccessLevel::Auth => "auth",
        }
    }
}

/// Open and auth derivative sizes for one asset, each ordered by
/// descending bounding square.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSizeManifest {
    #[serde(rename = "o")]
    open: Vec<Size>,
    #[serde(rename = "a")]
    auth: Vec<Size>,
}

impl ThumbnailSizeManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> &[Size] {
        &self.open
    }

    pub fn auth(&self) -> &[Size] {
        &self.auth
    }

    pub fn count(&self) -> usize {
        self.open.len() + self.auth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, size: &Size) -> bool {
        self.open.contains(size) || self.auth.contains(size)
    }

    /// Append `size` to the list for `access`. Returns false, leaving the
    /// manifest untouched, if the size is already listed in either list.
    pub fn add(&mut self, size: Size, access: AccessLevel) -> bool {
        if self.contains(&size) {
            return false;
        }
        match access {
            AccessLevel::Open => self.open.push(size),
            AccessLevel::Auth => self.auth.push(size),
        }
        true
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}

//! Asset identity and the metadata needed to lay out its thumbnails.

use crate::models::{manifest::AccessLevel, size::Size};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Globally unique asset identifier, `customer/space/asset`.
///
/// The `Display` form is both the per-asset lock key and the root of every
/// storage key for the asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId {
    pub customer: u32,
    pub space: u32,
    pub asset: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("`{0}` is not a valid customer/space/asset identifier")]
pub struct InvalidAssetId(pub String);

impl AssetId {
    pub fn new(customer: u32, space: u32, asset: impl Into<String>) -> Self {
        Self {
            customer,
            space,
            asset: asset.into(),
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.customer, self.space, self.asset)
    }
}

impl FromStr for AssetId {
    type Err = InvalidAssetId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAssetId(s.to_string());
        let mut parts = s.splitn(3, '/');
        let customer = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let space = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let asset = parts.next().filter(|a| is_valid_asset_name(a)).ok_or_else(invalid)?;
        Ok(Self::new(customer, space, asset))
    }
}

/// Asset names become a single storage key segment.
pub fn is_valid_asset_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}

/// Authorisation attributes that decide whether a derivative is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthAttributes {
    /// Largest long edge servable without authorisation. Negative disables
    /// the threshold; 0 is a valid, fully restrictive threshold.
    pub max_unauthorised: i32,
    pub roles: Vec<String>,
}

impl AuthAttributes {
    pub fn new(max_unauthorised: i32, roles: Vec<String>) -> Self {
        Self {
            max_unauthorised,
            roles,
        }
    }

    /// No threshold and no roles: everything is open.
    pub fn open() -> Self {
        Self::new(-1, Vec::new())
    }

    pub fn has_roles(&self) -> bool {
        !self.roles.is_empty()
    }

    /// Classify a derivative.
    ///
    /// With a threshold set, anything whose long edge exceeds it needs
    /// auth, whatever the roles. With the threshold disabled the asset is
    /// open unless it carries roles.
    pub fn access_for(&self, size: &Size) -> AccessLevel {
        let requires_auth = if self.max_unauthorised >= 0 {
            size.max_dimension() as i64 > self.max_unauthorised as i64
        } else {
            self.has_roles()
        };

        if requires_auth {
            AccessLevel::Auth
        } else {
            AccessLevel::Open
        }
    }
}

/// Everything the layout manager needs to know about an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    pub id: AssetId,
    pub width: u32,
    pub height: u32,
    pub auth: AuthAttributes,
    /// Bounding squares from the asset's thumbnail policy, in policy order.
    pub thumbnail_policy: Vec<u32>,
}

impl AssetMetadata {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Parse a comma separated list of bounding squares, e.g. `"1024,400,200,100"`.
pub fn parse_bounding_squares(raw: &str) -> Result<Vec<u32>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(format!("`{s}` is not a positive bounding square")),
            Ok(v) => Ok(v),
        })
        .collect()
}

/// Parse a comma separated role list; empty input means no roles.
pub fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

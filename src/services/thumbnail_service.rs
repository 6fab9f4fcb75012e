//! Thumbnail read path used by the image proxy.
//!
//! Makes sure the asset is laid out, then answers a IIIF size request from
//! the open derivatives listed in `s.json`.

use crate::{
    models::{
        asset::AssetId,
        manifest::{AccessLevel, ThumbnailSizeManifest},
        size::Size,
        size_request::SizeParameter,
    },
    services::{
        layout_manager::{LayoutError, LayoutResult, ThumbnailLayoutManager},
        object_store::{ObjectBody, StorageError},
        size_calculator::{self, SizeCandidate},
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How the read path treats requests with no exact derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePolicy {
    /// Allow serving a resized derivative at all.
    pub allow_resize: bool,
    /// Allow producing the ideal size by enlarging a smaller derivative.
    pub upscale: bool,
    /// Largest permitted enlargement, in percent. 0 means unlimited.
    pub upscale_threshold: u32,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            allow_resize: true,
            upscale: false,
            upscale_threshold: 0,
        }
    }
}

/// Outcome of a thumbnail request.
#[derive(Debug)]
pub enum ThumbnailResponse {
    /// An open derivative satisfies the request as-is.
    Exact { longest_edge: u32, body: ObjectBody },
    /// `source` resized to `ideal` satisfies the request.
    Resize { source: Size, ideal: Size },
    /// Nothing usable; the caller should go to the full image server.
    Fallback { reason: String },
    NotFound,
}

pub struct ThumbnailService {
    layout: Arc<ThumbnailLayoutManager>,
    policy: ResizePolicy,
}

impl ThumbnailService {
    pub fn new(layout: Arc<ThumbnailLayoutManager>, policy: ResizePolicy) -> Self {
        Self { layout, policy }
    }

    pub fn layout(&self) -> &Arc<ThumbnailLayoutManager> {
        &self.layout
    }

    /// Stored manifest for the asset, `None` when the asset has none yet.
    pub async fn get_sizes(
        &self,
        asset_id: &AssetId,
    ) -> Result<Option<ThumbnailSizeManifest>, LayoutError> {
        let location = self.layout.keys().sizes_json(asset_id);
        let Some(body) = self.layout.store().get_object(&location).await? else {
            return Ok(None);
        };
        let raw = body.into_bytes().await.map_err(StorageError::from)?;
        Ok(Some(ThumbnailSizeManifest::from_json(&raw)?))
    }

    pub async fn get_thumbnail(
        &self,
        asset_id: &AssetId,
        request: &SizeParameter,
        cancel: &CancellationToken,
    ) -> ThumbnailResponse {
        match self.layout.ensure_new_layout(asset_id, cancel).await {
            Ok(LayoutResult::AssetNotFound) => return ThumbnailResponse::NotFound,
            Ok(_) => {}
            Err(err) => {
                error!("failed to ensure thumbnail layout for {}: {}", asset_id, err);
                return fallback(format!("layout unavailable: {err}"));
            }
        }

        let manifest = match self.get_sizes(asset_id).await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return fallback("no size manifest"),
            Err(err) => {
                warn!("unable to read size manifest for {}: {}", asset_id, err);
                return fallback(format!("size manifest unreadable: {err}"));
            }
        };

        let candidate =
            size_calculator::get_candidate(manifest.open(), request, self.policy.allow_resize);
        debug!("{} size {} resolved to {:?}", asset_id, request, candidate);

        match candidate {
            SizeCandidate::Known { longest_edge } => {
                self.exact(asset_id, longest_edge).await
            }
            SizeCandidate::Resizable {
                ideal,
                larger,
                smaller,
            } => match choose_resize_source(ideal, larger, smaller, &self.policy) {
                Some(source) => ThumbnailResponse::Resize { source, ideal },
                None => fallback(format!("no derivative can be resized to {ideal}")),
            },
            SizeCandidate::Unknown => fallback(format!("no derivative matches {request}")),
        }
    }

    async fn exact(&self, asset_id: &AssetId, longest_edge: u32) -> ThumbnailResponse {
        let location = self
            .layout
            .keys()
            .thumbnail(asset_id, longest_edge, AccessLevel::Open);
        match self.layout.store().get_object(&location).await {
            Ok(Some(body)) => ThumbnailResponse::Exact { longest_edge, body },
            Ok(None) => {
                warn!("{} listed in manifest but missing from store", location);
                fallback(format!("derivative {longest_edge} missing"))
            }
            Err(err) => {
                error!("failed to read {}: {}", location, err);
                fallback(format!("derivative {longest_edge} unreadable: {err}"))
            }
        }
    }
}

fn fallback(reason: impl Into<String>) -> ThumbnailResponse {
    ThumbnailResponse::Fallback {
        reason: reason.into(),
    }
}

/// Prefer shrinking `larger`. Enlarging `smaller` needs upscaling enabled
/// and must stay within the threshold.
pub fn choose_resize_source(
    ideal: Size,
    larger: Option<Size>,
    smaller: Option<Size>,
    policy: &ResizePolicy,
) -> Option<Size> {
    if larger.is_some() {
        return larger;
    }
    if !policy.upscale {
        return None;
    }

    let smaller = smaller?;
    let increase = Size::size_increase_percent(&ideal, &smaller);
    if policy.upscale_threshold == 0 || increase <= policy.upscale_threshold as f64 {
        Some(smaller)
    } else {
        None
    }
}

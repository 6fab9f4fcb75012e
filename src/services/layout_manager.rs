//! ThumbnailLayoutManager: moves an asset's thumbnails from the legacy
//! layout into the open/auth layout, exactly once.
//!
//! The `s.json` manifest is the completion marker. It is written after every
//! derivative it lists has been copied, so its presence means the layout is
//! complete. Work for one asset is serialised by a per-asset lock; different
//! assets proceed in parallel.

use crate::{
    models::{
        asset::{AssetId, AssetMetadata},
        manifest::ThumbnailSizeManifest,
        object::ObjectLocation,
        size::Size,
    },
    services::{
        asset_repository::{AssetMetadataProvider, MetadataError},
        keyed_lock::{KeyedAsyncLock, KeyedLockGuard, LockTimeout},
        object_store::{ObjectStore, StorageError},
        size_calculator,
        storage_keys::{LARGEST_THUMB_KEY, SIZES_JSON_KEY, ThumbnailKeys},
    },
};
use bytes::Bytes;
use futures::future::try_join_all;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Legacy renders may be named one pixel off the computed size on the short
/// edge. The long edge must match exactly.
const LEGACY_SIZE_TOLERANCE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutResult {
    /// The layout was created by this call.
    Reorganised,
    /// `s.json` already existed; nothing was done.
    HasExpectedLayout,
    /// No metadata exists for the asset; storage was not touched.
    AssetNotFound,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("failed to serialise size manifest: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("reorganisation cancelled")]
    Cancelled,
}

/// A derivative to place: copy `source` to `dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedCopy {
    source: ObjectLocation,
    dest: ObjectLocation,
}

/// Manifest plus the copies that back every size in it.
#[derive(Debug, Default)]
struct LayoutPlan {
    manifest: ThumbnailSizeManifest,
    copies: Vec<PlannedCopy>,
    placed_edges: HashSet<u32>,
}

pub struct ThumbnailLayoutManager {
    store: Arc<dyn ObjectStore>,
    assets: Arc<dyn AssetMetadataProvider>,
    keys: ThumbnailKeys,
    locks: KeyedAsyncLock<String>,
    lock_timeout: Option<Duration>,
}

impl ThumbnailLayoutManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        assets: Arc<dyn AssetMetadataProvider>,
        keys: ThumbnailKeys,
    ) -> Self {
        Self {
            store,
            assets,
            keys,
            locks: KeyedAsyncLock::new(),
            lock_timeout: None,
        }
    }

    /// Give up with [`LayoutError::LockTimeout`] if another caller holds the
    /// asset for longer than `timeout`.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn keys(&self) -> &ThumbnailKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Make sure the asset has the open/auth layout and an `s.json`.
    ///
    /// Safe to call any number of times, concurrently. Failures before the
    /// manifest is written leave no manifest behind, so a retry starts from
    /// scratch. Copies already made are harmless and are overwritten.
    pub async fn ensure_new_layout(
        &self,
        asset_id: &AssetId,
        cancel: &CancellationToken,
    ) -> Result<LayoutResult, LayoutError> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LayoutError::Cancelled),
            guard = self.lock(asset_id) => guard?,
        };

        let listed = self.store.list_keys(&self.keys.root(asset_id)).await?;
        let existing: Vec<&str> = listed
            .iter()
            .filter_map(|key| self.keys.relative(asset_id, key))
            .collect();

        if existing.contains(&SIZES_JSON_KEY) {
            debug!("{} already has expected thumbnail layout", asset_id);
            return Ok(LayoutResult::HasExpectedLayout);
        }

        let Some(asset) = self.assets.get_asset(asset_id).await? else {
            debug!("{} not found, leaving thumbnails untouched", asset_id);
            return Ok(LayoutResult::AssetNotFound);
        };

        let plan = self.plan_layout(&asset, &existing);

        let copies = plan
            .copies
            .iter()
            .map(|copy| self.store.copy_object(&copy.source, &copy.dest));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LayoutError::Cancelled),
            copied = try_join_all(copies) => { copied?; }
        }

        if cancel.is_cancelled() {
            return Err(LayoutError::Cancelled);
        }

        let manifest_json = plan.manifest.to_json()?;
        self.store
            .put_object(
                &self.keys.sizes_json(asset_id),
                Bytes::from(manifest_json),
                "application/json",
            )
            .await?;

        self.remove_deprecated(asset_id, &existing, &plan.placed_edges)
            .await;

        info!(
            "reorganised thumbnails for {}: {} open, {} auth",
            asset_id,
            plan.manifest.open().len(),
            plan.manifest.auth().len()
        );
        Ok(LayoutResult::Reorganised)
    }

    async fn lock(&self, asset_id: &AssetId) -> Result<KeyedLockGuard<String>, LockTimeout> {
        let key = asset_id.to_string();
        match self.lock_timeout {
            Some(timeout) => self.locks.acquire_timeout(key, timeout).await,
            None => Ok(self.locks.acquire(key).await),
        }
    }

    /// Decide which sizes go in the manifest and where each comes from.
    ///
    /// Sizes are visited largest first. The largest is taken from `low.jpg`
    /// when present. Otherwise a size is backed by a legacy confined render
    /// within tolerance, then by a flat `{n}.jpg` with the same long edge.
    /// Sizes with no source are left out.
    fn plan_layout(&self, asset: &AssetMetadata, existing: &[&str]) -> LayoutPlan {
        let matcher = self.keys.matcher();
        let legacy_renders: Vec<Size> = existing
            .iter()
            .filter_map(|key| matcher.confined_render_size(key))
            .collect();
        let flat_edges: HashSet<u32> = existing
            .iter()
            .filter_map(|key| matcher.flat_thumbnail_edge(key))
            .collect();
        let has_largest = existing.contains(&LARGEST_THUMB_KEY);

        let sizes = size_calculator::classified_sizes(
            asset.size(),
            &asset.thumbnail_policy,
            &asset.auth,
        );

        let mut plan = LayoutPlan::default();

        for (index, (size, access)) in sizes.into_iter().enumerate() {
            let longest_edge = size.max_dimension();
            if plan.placed_edges.contains(&longest_edge) {
                continue;
            }

            let source = if index == 0 && has_largest {
                Some(self.keys.largest_legacy(&asset.id))
            } else {
                find_legacy_render(size, &legacy_renders)
                    .map(|render| self.keys.legacy_thumbnail(&asset.id, render))
                    .or_else(|| {
                        flat_edges
                            .contains(&longest_edge)
                            .then(|| self.keys.flat_thumbnail(&asset.id, longest_edge))
                    })
            };

            let Some(source) = source else {
                warn!("{} has no legacy thumbnail for {}, omitting it", asset.id, size);
                continue;
            };

            plan.placed_edges.insert(longest_edge);
            plan.manifest.add(size, access);
            plan.copies.push(PlannedCopy {
                source,
                dest: self.keys.thumbnail(&asset.id, longest_edge, access),
            });
        }

        plan
    }

    /// Delete `sizes.json` and every flat `{n}.jpg` whose edge now has an
    /// open or auth copy. Flat files for edges that were not placed are the
    /// only copy left and stay. Best effort: failures are logged, never
    /// returned.
    async fn remove_deprecated(
        &self,
        asset_id: &AssetId,
        existing: &[&str],
        placed: &HashSet<u32>,
    ) {
        let matcher = self.keys.matcher();
        let root = self.keys.root(asset_id);
        let targets: Vec<ObjectLocation> = existing
            .iter()
            .filter(|key| match matcher.flat_thumbnail_edge(key) {
                Some(edge) => placed.contains(&edge),
                None => matcher.is_deprecated(key),
            })
            .map(|key| root.with_key(format!("{}{}", root.key, key)))
            .collect();

        if targets.is_empty() {
            return;
        }

        match self.store.delete_objects(&targets).await {
            Ok(()) => debug!("removed {} deprecated objects for {}", targets.len(), asset_id),
            Err(err) => warn!("failed to remove deprecated objects for {}: {}", asset_id, err),
        }
    }
}

/// The legacy render that backs `size`: an exact match if there is one,
/// otherwise one with the same long edge and a short edge within
/// [`LEGACY_SIZE_TOLERANCE`].
fn find_legacy_render(size: Size, renders: &[Size]) -> Option<Size> {
    renders
        .iter()
        .filter(|render| render.max_dimension() == size.max_dimension())
        .filter_map(|render| {
            let dw = render.width.abs_diff(size.width);
            let dh = render.height.abs_diff(size.height);
            (dw <= LEGACY_SIZE_TOLERANCE && dh <= LEGACY_SIZE_TOLERANCE).then_some((dw + dh, *render))
        })
        .min_by_key(|(deviation, _)| *deviation)
        .map(|(_, render)| render)
}

use crate::services::{local_store::LocalObjectStore, thumbnail_service::ThumbnailService};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Backing store, used directly for object ingress and readiness checks.
    pub store: LocalObjectStore,
    pub thumbnails: Arc<ThumbnailService>,
}

impl AppState {
    pub fn new(store: LocalObjectStore, thumbnails: Arc<ThumbnailService>) -> Self {
        Self { store, thumbnails }
    }

    /// Bucket the thumbnail layout lives in.
    pub fn thumbs_bucket(&self) -> &str {
        self.thumbnails.layout().keys().bucket()
    }
}

//! The blob-store contract consumed by the layout manager and read path.

use crate::models::object::ObjectLocation;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn not_found(location: &ObjectLocation) -> Self {
        StorageError::ObjectNotFound {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
        }
    }
}

/// A stored object opened for reading.
pub struct ObjectBody {
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub etag: Option<String>,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl ObjectBody {
    /// Drain the stream into memory. Only for small objects such as `s.json`.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size_bytes.max(0) as usize);
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.size_bytes)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// Minimal blob store surface: list, get, put, same-store copy, batch delete.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in `prefix.bucket` starting with `prefix.key`, in key order.
    async fn list_keys(&self, prefix: &ObjectLocation) -> StorageResult<Vec<String>>;

    /// Open an object, `None` if it does not exist.
    async fn get_object(&self, location: &ObjectLocation) -> StorageResult<Option<ObjectBody>>;

    /// Create or overwrite an object.
    async fn put_object(
        &self,
        location: &ObjectLocation,
        content: Bytes,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Copy `source` to `dest`, overwriting `dest`. Fails with
    /// `ObjectNotFound` when `source` is missing.
    async fn copy_object(&self, source: &ObjectLocation, dest: &ObjectLocation)
    -> StorageResult<()>;

    /// Remove every listed object. Missing objects are not an error.
    async fn delete_objects(&self, locations: &[ObjectLocation]) -> StorageResult<()>;
}

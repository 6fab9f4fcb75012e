//! In-memory [`ObjectStore`] that journals every mutation.
//!
//! Used by tests and local experiments. Copy latency and per-operation
//! failures can be injected to exercise cancellation and error paths.

use crate::{
    models::object::ObjectLocation,
    services::object_store::{ObjectBody, ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// A mutation applied to the store, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    Put { key: String },
    Copy { source: String, dest: String },
    Delete { keys: Vec<String> },
}

#[derive(Debug, Clone)]
struct StoredObject {
    content: Bytes,
    content_type: String,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), StoredObject>,
    journal: Vec<StoreOperation>,
    copy_delay: Option<Duration>,
    prefix_delays: Vec<(String, Duration)>,
    fail_copies: bool,
    fail_deletes: bool,
    fail_lists: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without journalling it.
    pub async fn insert(&self, location: &ObjectLocation, content: impl Into<Bytes>) {
        let mut inner = self.inner.lock().await;
        inner.objects.insert(
            (location.bucket.clone(), location.key.clone()),
            StoredObject {
                content: content.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    /// Seed several keys in one bucket with placeholder content.
    pub async fn insert_keys(&self, bucket: &str, keys: &[&str]) {
        for key in keys {
            self.insert(&ObjectLocation::new(bucket, *key), Bytes::from(key.to_string()))
                .await;
        }
    }

    pub async fn read(&self, location: &ObjectLocation) -> Option<Bytes> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|o| o.content.clone())
    }

    /// Every key in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub async fn journal(&self) -> Vec<StoreOperation> {
        self.inner.lock().await.journal.clone()
    }

    /// `(source, dest)` for each copy, in order.
    pub async fn copies(&self) -> Vec<(String, String)> {
        self.journal()
            .await
            .into_iter()
            .filter_map(|op| match op {
                StoreOperation::Copy { source, dest } => Some((source, dest)),
                _ => None,
            })
            .collect()
    }

    pub async fn puts(&self) -> Vec<String> {
        self.journal()
            .await
            .into_iter()
            .filter_map(|op| match op {
                StoreOperation::Put { key } => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Every key passed to `delete_objects`, flattened.
    pub async fn deleted(&self) -> Vec<String> {
        self.journal()
            .await
            .into_iter()
            .filter_map(|op| match op {
                StoreOperation::Delete { keys } => Some(keys),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub async fn set_copy_delay(&self, delay: Duration) {
        self.inner.lock().await.copy_delay = Some(delay);
    }

    /// Delay only copies whose source key starts with `prefix`. Takes
    /// precedence over [`Self::set_copy_delay`].
    pub async fn set_copy_delay_for(&self, prefix: impl Into<String>, delay: Duration) {
        self.inner
            .lock()
            .await
            .prefix_delays
            .push((prefix.into(), delay));
    }

    pub async fn fail_copies(&self, fail: bool) {
        self.inner.lock().await.fail_copies = fail;
    }

    pub async fn fail_deletes(&self, fail: bool) {
        self.inner.lock().await.fail_deletes = fail;
    }

    pub async fn fail_lists(&self, fail: bool) {
        self.inner.lock().await.fail_lists = fail;
    }
}

fn injected(operation: &str) -> StorageError {
    StorageError::Unavailable(format!("injected {operation} failure"))
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_keys(&self, prefix: &ObjectLocation) -> StorageResult<Vec<String>> {
        let inner = self.inner.lock().await;
        if inner.fail_lists {
            return Err(injected("list"));
        }
        Ok(inner
            .objects
            .keys()
            .filter(|(b, k)| *b == prefix.bucket && k.starts_with(prefix.key.as_str()))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn get_object(&self, location: &ObjectLocation) -> StorageResult<Option<ObjectBody>> {
        let inner = self.inner.lock().await;
        let Some(object) = inner
            .objects
            .get(&(location.bucket.clone(), location.key.clone()))
        else {
            return Ok(None);
        };

        let content = object.content.clone();
        Ok(Some(ObjectBody {
            content_type: Some(object.content_type.clone()),
            size_bytes: content.len() as i64,
            etag: Some(format!("{:x}", md5::compute(&content))),
            stream: stream::once(async move { Ok::<_, std::io::Error>(content) }).boxed(),
        }))
    }

    async fn put_object(
        &self,
        location: &ObjectLocation,
        content: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        inner.objects.insert(
            (location.bucket.clone(), location.key.clone()),
            StoredObject {
                content,
                content_type: content_type.to_string(),
            },
        );
        inner.journal.push(StoreOperation::Put {
            key: location.key.clone(),
        });
        Ok(())
    }

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        dest: &ObjectLocation,
    ) -> StorageResult<()> {
        let delay = {
            let inner = self.inner.lock().await;
            inner
                .prefix_delays
                .iter()
                .find(|(prefix, _)| source.key.starts_with(prefix.as_str()))
                .map(|(_, delay)| *delay)
                .or(inner.copy_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        if inner.fail_copies {
            return Err(injected("copy"));
        }
        let object = inner
            .objects
            .get(&(source.bucket.clone(), source.key.clone()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(source))?;
        inner
            .objects
            .insert((dest.bucket.clone(), dest.key.clone()), object);
        inner.journal.push(StoreOperation::Copy {
            source: source.key.clone(),
            dest: dest.key.clone(),
        });
        Ok(())
    }

    async fn delete_objects(&self, locations: &[ObjectLocation]) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_deletes {
            return Err(injected("delete"));
        }
        for location in locations {
            inner
                .objects
                .remove(&(location.bucket.clone(), location.key.clone()));
        }
        inner.journal.push(StoreOperation::Delete {
            keys: locations.iter().map(|l| l.key.clone()).collect(),
        });
        Ok(())
    }
}

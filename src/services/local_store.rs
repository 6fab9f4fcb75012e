//! src/services/local_store.rs
//!
//! LocalObjectStore: an [`ObjectStore`] backed by SQLite for object
//! metadata and local disk for payloads, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{bucket::Bucket, object::Object, object::ObjectLocation},
    services::object_store::{ObjectBody, ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const LIST_PAGE_SIZE: i64 = 1000;

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Rejects keys that are empty, absolute, contain `..` or control
    /// characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// S3-like bucket naming: 3–63 lowercase letters, digits, dots and
    /// hyphens, starting and ending alphanumeric, no `..`.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// First two bytes of MD5(bucket/key) as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn validate(&self, location: &ObjectLocation) -> StorageResult<()> {
        self.ensure_bucket_name_safe(&location.bucket)?;
        self.ensure_key_safe(&location.key)
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Option<Bucket>> {
        self.ensure_bucket_name_safe(bucket)?;
        let bucket = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&*self.db)
        .await?;
        Ok(bucket)
    }

    /// Fetch a bucket, creating the row and directory on first use.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        if let Some(existing) = self.fetch_bucket(bucket).await? {
            return Ok(existing);
        }

        fs::create_dir_all(self.bucket_root(bucket)).await?;
        sqlx::query("INSERT OR IGNORE INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(bucket)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        debug!("created bucket {}", bucket);

        self.fetch_bucket(bucket)
            .await?
            .ok_or_else(|| StorageError::Unavailable(format!("bucket `{bucket}` vanished")))
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Option<Object>> {
        let object = sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(object)
    }

    /// Insert or overwrite the metadata row for `key`.
    async fn upsert_object(
        &self,
        bucket: &Bucket,
        key: &str,
        content_type: Option<&str>,
        size_bytes: i64,
        etag: Option<&str>,
    ) -> StorageResult<Object> {
        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (id, bucket_id, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(object)
    }

    /// Stream-upload an object to disk and record its metadata.
    ///
    /// Bytes go to a temp file next to the destination, which is fsynced
    /// and renamed into place. The temp file is removed on any failure.
    pub async fn upload_object_stream<S>(
        &self,
        location: &ObjectLocation,
        content_type: Option<&str>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.validate(location)?;
        let bucket = self.ensure_bucket(&location.bucket).await?;

        let file_path = self.object_path(&bucket.name, &location.key);
        let parent = parent_dir(&file_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, etag) = match write_stream(&tmp_path, stream).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        self.upsert_object(&bucket, &location.key, content_type, size_bytes, Some(&etag))
            .await
    }

    /// Metadata for an object, `None` if it does not exist.
    pub async fn get_object_metadata(
        &self,
        location: &ObjectLocation,
    ) -> StorageResult<Option<Object>> {
        self.validate(location)?;
        match self.fetch_bucket(&location.bucket).await? {
            Some(bucket) => self.fetch_object(&bucket, &location.key).await,
            None => Ok(None),
        }
    }

    async fn delete_one(&self, location: &ObjectLocation) -> StorageResult<()> {
        self.validate(location)?;
        let Some(bucket) = self.fetch_bucket(&location.bucket).await? else {
            return Ok(());
        };

        sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(&location.key)
            .bind(bucket.id)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(&bucket.name, &location.key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(&bucket.name))
                .await;
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_keys(&self, prefix: &ObjectLocation) -> StorageResult<Vec<String>> {
        let Some(bucket) = self.fetch_bucket(&prefix.bucket).await? else {
            return Ok(Vec::new());
        };

        let mut keys = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut builder =
                QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE bucket_id = ");
            builder.push_bind(bucket.id);
            builder.push(" AND instr(key, ");
            builder.push_bind(prefix.key.clone());
            builder.push(") = 1");
            if let Some(last) = &after {
                builder.push(" AND key > ");
                builder.push_bind(last.clone());
            }
            builder.push(" ORDER BY key ASC LIMIT ");
            builder.push_bind(LIST_PAGE_SIZE);

            let page: Vec<String> = builder.build_query_scalar().fetch_all(&*self.db).await?;
            let exhausted = (page.len() as i64) < LIST_PAGE_SIZE;
            after = page.last().cloned();
            keys.extend(page);
            if exhausted {
                break;
            }
        }

        Ok(keys)
    }

    async fn get_object(&self, location: &ObjectLocation) -> StorageResult<Option<ObjectBody>> {
        let Some(meta) = self.get_object_metadata(location).await? else {
            return Ok(None);
        };

        let file_path = self.object_path(&location.bucket, &location.key);
        let file = match File::open(&file_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("metadata present but payload missing at {}", file_path.display());
                return Ok(None);
            }
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(Some(ObjectBody {
            content_type: meta.content_type,
            size_bytes: meta.size_bytes,
            etag: meta.etag,
            stream: ReaderStream::new(file).boxed(),
        }))
    }

    async fn put_object(
        &self,
        location: &ObjectLocation,
        content: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        let stream = futures::stream::iter([Ok::<_, io::Error>(content)]);
        self.upload_object_stream(location, Some(content_type), stream)
            .await?;
        Ok(())
    }

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        dest: &ObjectLocation,
    ) -> StorageResult<()> {
        self.validate(dest)?;
        let meta = self
            .get_object_metadata(source)
            .await?
            .ok_or_else(|| StorageError::not_found(source))?;
        let dest_bucket = self.ensure_bucket(&dest.bucket).await?;

        let source_path = self.object_path(&source.bucket, &source.key);
        let dest_path = self.object_path(&dest_bucket.name, &dest.key);
        let parent = parent_dir(&dest_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = fs::copy(&source_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(match err.kind() {
                ErrorKind::NotFound => StorageError::not_found(source),
                _ => StorageError::Io(err),
            });
        }
        if let Err(err) = fs::rename(&tmp_path, &dest_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        self.upsert_object(
            &dest_bucket,
            &dest.key,
            meta.content_type.as_deref(),
            meta.size_bytes,
            meta.etag.as_deref(),
        )
        .await?;
        debug!("copied {} to {}", source, dest);
        Ok(())
    }

    /// Every location is attempted. Failures are logged and the first one is
    /// returned once the batch is done.
    async fn delete_objects(&self, locations: &[ObjectLocation]) -> StorageResult<()> {
        let mut first_error = None;
        for location in locations {
            if let Err(err) = self.delete_one(location).await {
                warn!(
                    "failed to delete {}/{}: {}",
                    location.bucket, location.key, err
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn parent_dir(path: &Path) -> StorageResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })
}

/// Write `stream` to `path`, fsync, and return (size, md5 hex).
async fn write_stream<S>(path: &Path, stream: S) -> io::Result<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size_bytes, format!("{:x}", digest.compute())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn store() -> (LocalObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        (LocalObjectStore::new(Arc::new(pool), dir.path()), dir)
    }

    fn loc(key: &str) -> ObjectLocation {
        ObjectLocation::new("thumbs", key)
    }

    #[tokio::test]
    async fn put_then_get_returns_payload_and_etag() {
        let (store, _dir) = store().await;
        store
            .put_object(&loc("2/1/a/s.json"), Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();

        let body = store.get_object(&loc("2/1/a/s.json")).await.unwrap().unwrap();
        assert_eq!(body.content_type.as_deref(), Some("application/json"));
        assert_eq!(body.etag.as_deref(), Some(format!("{:x}", md5::compute(b"{}")).as_str()));
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn missing_objects_read_as_none() {
        let (store, _dir) = store().await;
        assert!(store.get_object(&loc("2/1/a/low.jpg")).await.unwrap().is_none());
        assert!(store.list_keys(&loc("2/1/a/")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix_in_order() {
        let (store, _dir) = store().await;
        for key in ["2/1/b/low.jpg", "2/1/a/low.jpg", "2/1/a/full/50,100/0/default.jpg", "2/10/a/low.jpg"] {
            store
                .put_object(&loc(key), Bytes::from_static(b"x"), "image/jpeg")
                .await
                .unwrap();
        }

        let keys = store.list_keys(&loc("2/1/a/")).await.unwrap();
        assert_eq!(keys, vec!["2/1/a/full/50,100/0/default.jpg", "2/1/a/low.jpg"]);
    }

    #[tokio::test]
    async fn copy_duplicates_payload_and_metadata() {
        let (store, _dir) = store().await;
        store
            .put_object(&loc("2/1/a/low.jpg"), Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();
        store
            .copy_object(&loc("2/1/a/low.jpg"), &loc("2/1/a/open/1024.jpg"))
            .await
            .unwrap();

        let copied = store.get_object(&loc("2/1/a/open/1024.jpg")).await.unwrap().unwrap();
        assert_eq!(copied.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(copied.into_bytes().await.unwrap(), Bytes::from_static(b"jpeg"));
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let (store, _dir) = store().await;
        let err = store
            .copy_object(&loc("2/1/a/low.jpg"), &loc("2/1/a/open/1024.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_removes_rows_and_ignores_missing() {
        let (store, _dir) = store().await;
        store
            .put_object(&loc("2/1/a/100.jpg"), Bytes::from_static(b"x"), "image/jpeg")
            .await
            .unwrap();
        store
            .delete_objects(&[loc("2/1/a/100.jpg"), loc("2/1/a/sizes.json")])
            .await
            .unwrap();
        assert!(store.list_keys(&loc("2/1/a/")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_continues_past_failed_entries() {
        let (store, _dir) = store().await;
        for key in ["2/1/a/100.jpg", "2/1/a/200.jpg"] {
            store
                .put_object(&loc(key), Bytes::from_static(b"x"), "image/jpeg")
                .await
                .unwrap();
        }

        let err = store
            .delete_objects(&[loc("2/1/a/100.jpg"), loc("../escape"), loc("2/1/a/200.jpg")])
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidObjectKey));
        assert!(store.list_keys(&loc("2/1/a/")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_unsafe_keys() {
        let (store, _dir) = store().await;
        let err = store
            .put_object(&loc("../escape"), Bytes::new(), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey));
    }
}

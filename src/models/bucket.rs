//! A bucket in the local store, a top-level namespace for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Buckets are created implicitly on first write.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name, also the top-level directory on disk.
    pub name: String,

    pub created_at: DateTime<Utc>,
}

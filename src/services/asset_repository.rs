//! Asset metadata lookup: dimensions, auth attributes and thumbnail policy.

use crate::models::asset::{
    AssetId, AssetMetadata, AuthAttributes, parse_bounding_squares, parse_roles,
};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("asset `{asset}` has invalid thumbnail policy `{policy}`: {reason}")]
    InvalidPolicy {
        asset: String,
        policy: String,
        reason: String,
    },
    #[error("asset `{asset}` has invalid dimensions {width}x{height}")]
    InvalidDimensions { asset: String, width: i64, height: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Source of truth for asset metadata. `Ok(None)` means the asset does not
/// exist.
#[async_trait]
pub trait AssetMetadataProvider: Send + Sync {
    async fn get_asset(&self, id: &AssetId) -> Result<Option<AssetMetadata>, MetadataError>;
}

#[derive(FromRow, Debug)]
struct AssetRow {
    width: i64,
    height: i64,
    max_unauthorised: i64,
    roles: String,
    thumbnail_policy: String,
    sizes: String,
}

/// Reads the `assets` and `thumbnail_policies` tables.
#[derive(Clone)]
pub struct SqliteAssetRepository {
    db: Arc<SqlitePool>,
}

impl SqliteAssetRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create or replace a thumbnail policy.
    pub async fn upsert_policy(&self, id: &str, sizes: &[u32]) -> Result<(), MetadataError> {
        let sizes = sizes
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        sqlx::query(
            "INSERT INTO thumbnail_policies (id, sizes) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET sizes = excluded.sizes",
        )
        .bind(id)
        .bind(sizes)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Create or replace an asset row pointing at an existing policy.
    pub async fn upsert_asset(
        &self,
        id: &AssetId,
        width: u32,
        height: u32,
        auth: &AuthAttributes,
        policy: &str,
    ) -> Result<(), MetadataError> {
        sqlx::query(
            r#"
            INSERT INTO assets (customer, space, id, width, height, max_unauthorised, roles, thumbnail_policy)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(customer, space, id) DO UPDATE SET
                width = excluded.width,
                height = excluded.height,
                max_unauthorised = excluded.max_unauthorised,
                roles = excluded.roles,
                thumbnail_policy = excluded.thumbnail_policy
            "#,
        )
        .bind(id.customer as i64)
        .bind(id.space as i64)
        .bind(&id.asset)
        .bind(width as i64)
        .bind(height as i64)
        .bind(auth.max_unauthorised as i64)
        .bind(auth.roles.join(","))
        .bind(policy)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AssetMetadataProvider for SqliteAssetRepository {
    async fn get_asset(&self, id: &AssetId) -> Result<Option<AssetMetadata>, MetadataError> {
        let row = sqlx::query_as::<_, AssetRow>(
            "SELECT a.width, a.height, a.max_unauthorised, a.roles, a.thumbnail_policy, p.sizes
             FROM assets a
             JOIN thumbnail_policies p ON p.id = a.thumbnail_policy
             WHERE a.customer = ? AND a.space = ? AND a.id = ?",
        )
        .bind(id.customer as i64)
        .bind(id.space as i64)
        .bind(&id.asset)
        .fetch_optional(&*self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let (width, height) = match (u32::try_from(row.width), u32::try_from(row.height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(MetadataError::InvalidDimensions {
                    asset: id.to_string(),
                    width: row.width,
                    height: row.height,
                });
            }
        };

        let thumbnail_policy =
            parse_bounding_squares(&row.sizes).map_err(|reason| MetadataError::InvalidPolicy {
                asset: id.to_string(),
                policy: row.thumbnail_policy.clone(),
                reason,
            })?;

        let max_unauthorised = row.max_unauthorised.clamp(i32::MIN as i64, i32::MAX as i64) as i32;

        Ok(Some(AssetMetadata {
            id: id.clone(),
            width,
            height,
            auth: AuthAttributes::new(max_unauthorised, parse_roles(&row.roles)),
            thumbnail_policy,
        }))
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;
use thumbs_layout::{
    db,
    models::{
        asset::{AssetId, AssetMetadata, AuthAttributes},
        object::ObjectLocation,
        size::Size,
        size_request::SizeParameter,
    },
    services::{
        asset_repository::{AssetMetadataProvider, MetadataError, SqliteAssetRepository},
        layout_manager::{LayoutResult, ThumbnailLayoutManager},
        local_store::LocalObjectStore,
        memory_store::InMemoryObjectStore,
        object_store::ObjectStore,
        storage_keys::{LegacyKeyMatcher, ThumbnailKeys},
        thumbnail_service::{ResizePolicy, ThumbnailResponse, ThumbnailService},
    },
};
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "thumbs";

struct SingleAsset(AssetMetadata);

#[async_trait]
impl AssetMetadataProvider for SingleAsset {
    async fn get_asset(&self, id: &AssetId) -> Result<Option<AssetMetadata>, MetadataError> {
        Ok((self.0.id == *id).then(|| self.0.clone()))
    }
}

fn keys() -> ThumbnailKeys {
    ThumbnailKeys::new(BUCKET, LegacyKeyMatcher::new().unwrap())
}

async fn build_service(policy: ResizePolicy) -> (ThumbnailService, AssetId) {
    let id = AssetId::new(2, 1, "the-astronaut");
    let store = InMemoryObjectStore::new();
    for relative in [
        "low.jpg",
        "full/200,400/0/default.jpg",
        "full/100,200/0/default.jpg",
        "full/50,100/0/default.jpg",
    ] {
        store
            .insert(
                &ObjectLocation::new(BUCKET, format!("{id}/{relative}")),
                Bytes::from(relative.to_string()),
            )
            .await;
    }
    let assets = SingleAsset(AssetMetadata {
        id: id.clone(),
        width: 4000,
        height: 8000,
        auth: AuthAttributes::new(1000, vec![]),
        thumbnail_policy: vec![1024, 400, 200, 100],
    });
    let layout = ThumbnailLayoutManager::new(Arc::new(store), Arc::new(assets), keys());
    (ThumbnailService::new(Arc::new(layout), policy), id)
}

#[tokio::test]
async fn exact_request_streams_open_derivative() {
    let (service, id) = build_service(ResizePolicy::default()).await;

    let response = service
        .get_thumbnail(&id, &SizeParameter::exact(200, 400), &CancellationToken::new())
        .await;

    let (longest_edge, body) = match response {
        ThumbnailResponse::Exact { longest_edge, body } => (longest_edge, body),
        other => panic!("expected exact match, got {other:?}"),
    };
    assert_eq!(longest_edge, 400);
    assert_eq!(
        body.into_bytes().await.unwrap(),
        Bytes::from_static(b"full/200,400/0/default.jpg")
    );
}

#[tokio::test]
async fn auth_sizes_are_not_served() {
    let (service, id) = build_service(ResizePolicy {
        allow_resize: false,
        ..ResizePolicy::default()
    })
    .await;

    let response = service
        .get_thumbnail(&id, &SizeParameter::exact(512, 1024), &CancellationToken::new())
        .await;
    assert!(matches!(response, ThumbnailResponse::Fallback { .. }));
}

#[tokio::test]
async fn inexact_request_plans_resize_from_larger() {
    let (service, id) = build_service(ResizePolicy::default()).await;

    let response = service
        .get_thumbnail(&id, &SizeParameter::confined(300, 300), &CancellationToken::new())
        .await;

    let (source, ideal) = match response {
        ThumbnailResponse::Resize { source, ideal } => (source, ideal),
        other => panic!("expected resize, got {other:?}"),
    };
    assert_eq!(source, Size::new(200, 400));
    assert_eq!(ideal, Size::new(150, 300));
}

#[tokio::test]
async fn upscaling_beyond_open_sizes_needs_policy() {
    let (service, id) = build_service(ResizePolicy::default()).await;
    let response = service
        .get_thumbnail(&id, &SizeParameter::height_only(800), &CancellationToken::new())
        .await;
    assert!(matches!(response, ThumbnailResponse::Fallback { .. }));

    let (service, id) = build_service(ResizePolicy {
        allow_resize: true,
        upscale: true,
        upscale_threshold: 0,
    })
    .await;
    let response = service
        .get_thumbnail(&id, &SizeParameter::height_only(800), &CancellationToken::new())
        .await;
    assert!(matches!(
        response,
        ThumbnailResponse::Resize { source, .. } if source == Size::new(200, 400)
    ));
}

#[tokio::test]
async fn unknown_asset_is_not_found() {
    let (service, _) = build_service(ResizePolicy::default()).await;
    let response = service
        .get_thumbnail(
            &AssetId::new(2, 1, "someone-else"),
            &SizeParameter::max(),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(response, ThumbnailResponse::NotFound));
}

#[tokio::test]
async fn get_sizes_reads_stored_manifest() {
    let (service, id) = build_service(ResizePolicy::default()).await;
    assert!(service.get_sizes(&id).await.unwrap().is_none());

    service
        .layout()
        .ensure_new_layout(&id, &CancellationToken::new())
        .await
        .unwrap();

    let manifest = service.get_sizes(&id).await.unwrap().unwrap();
    assert_eq!(manifest.auth(), &[Size::new(512, 1024)]);
    assert_eq!(
        manifest.open(),
        &[Size::new(200, 400), Size::new(100, 200), Size::new(50, 100)]
    );
}

#[tokio::test]
async fn reorganises_against_sqlite_and_disk() {
    let dir = TempDir::new().unwrap();
    let pool = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap(),
    );
    db::run_migrations(&pool).await.unwrap();

    let id = AssetId::new(7, 3, "painting");
    let repo = SqliteAssetRepository::new(pool.clone());
    repo.upsert_policy("default", &[1024, 400]).await.unwrap();
    repo.upsert_asset(&id, 3000, 1500, &AuthAttributes::new(-1, vec![]), "default")
        .await
        .unwrap();

    let store = LocalObjectStore::new(pool, dir.path());
    for relative in ["low.jpg", "full/400,200/0/default.jpg", "400.jpg"] {
        store
            .put_object(
                &ObjectLocation::new(BUCKET, format!("{id}/{relative}")),
                Bytes::from_static(b"jpeg"),
                "image/jpeg",
            )
            .await
            .unwrap();
    }

    let layout = ThumbnailLayoutManager::new(Arc::new(store.clone()), Arc::new(repo), keys());
    let result = layout
        .ensure_new_layout(&id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, LayoutResult::Reorganised);

    let keys = store
        .list_keys(&ObjectLocation::new(BUCKET, format!("{id}/")))
        .await
        .unwrap();
    assert_eq!(
        keys,
        vec![
            "7/3/painting/full/400,200/0/default.jpg",
            "7/3/painting/low.jpg",
            "7/3/painting/open/1024.jpg",
            "7/3/painting/open/400.jpg",
            "7/3/painting/s.json",
        ]
    );

    let manifest = store
        .get_object(&ObjectLocation::new(BUCKET, format!("{id}/s.json")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manifest.content_type.as_deref(), Some("application/json"));
    assert_eq!(
        manifest.into_bytes().await.unwrap(),
        Bytes::from_static(br#"{"o":[[1024,512],[400,200]],"a":[]}"#)
    );
}

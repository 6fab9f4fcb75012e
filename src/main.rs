use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use thumbs_layout::{
    config::AppConfig,
    db, routes,
    services::{
        asset_repository::SqliteAssetRepository,
        layout_manager::ThumbnailLayoutManager,
        local_store::LocalObjectStore,
        storage_keys::{LegacyKeyMatcher, ThumbnailKeys},
        thumbnail_service::{ResizePolicy, ThumbnailService},
    },
    state::AppState,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting thumbs-layout with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // sqlx refuses to open a missing file unless asked to create it.
    let connect_url = if db_url.contains('?') || db_url.contains(":memory:") {
        db_url.clone()
    } else {
        format!("{}?mode=rwc", db_url)
    };
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&connect_url)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize services ---
    let store = LocalObjectStore::new(db.clone(), cfg.storage_dir.clone());
    let assets = Arc::new(SqliteAssetRepository::new(db.clone()));
    let keys = ThumbnailKeys::new(
        cfg.thumbs_bucket.clone(),
        LegacyKeyMatcher::new().context("compiling legacy key patterns")?,
    );
    let layout = Arc::new(
        ThumbnailLayoutManager::new(Arc::new(store.clone()), assets, keys)
            .with_lock_timeout(cfg.lock_timeout),
    );
    let thumbnails = Arc::new(ThumbnailService::new(
        layout,
        ResizePolicy {
            allow_resize: cfg.allow_resize,
            upscale: cfg.upscale,
            upscale_threshold: cfg.upscale_threshold,
        },
    ));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState::new(store, thumbnails));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

//! Route table.
//!
//! - `GET  /healthz`, `GET /readyz`
//! - `POST /thumbs/{customer}/{space}/{asset}/reorganise`: ensure layout
//! - `GET  /thumbs/{customer}/{space}/{asset}/sizes`: stored `s.json`
//! - `GET  /thumbs/{customer}/{space}/{asset}/full/{size}/0/default.jpg`
//! - `PUT  /objects/{*key}`, `GET /objects/{*key}`: raw thumbs-bucket objects
//!
//! The wildcard `*key` allows nested keys like `2/1/asset/low.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, upload_object},
        thumb_handlers::{get_sizes, get_thumbnail, reorganise},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/thumbs/{customer}/{space}/{asset}/reorganise",
            post(reorganise),
        )
        .route("/thumbs/{customer}/{space}/{asset}/sizes", get(get_sizes))
        .route(
            "/thumbs/{customer}/{space}/{asset}/full/{size}/0/default.jpg",
            get(get_thumbnail),
        )
        .route("/objects/{*key}", put(upload_object).get(get_object))
}

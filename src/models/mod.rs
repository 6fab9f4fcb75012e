//! Core data models for the thumbnail layout service.
//!
//! `size`, `size_request`, `asset` and `manifest` are pure value types used
//! by the layout and size-matching logic. `bucket` and `object` map to the
//! local object store's SQLite tables via `sqlx::FromRow`.

pub mod asset;
pub mod bucket;
pub mod manifest;
pub mod object;
pub mod size;
pub mod size_request;

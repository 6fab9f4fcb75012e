//! IIIF thumbnail layout service.
//!
//! Reorganises thumbnails produced by an upstream image pipeline into an
//! open/auth partitioned layout with an `s.json` size manifest, and resolves
//! IIIF size requests against the derivatives that exist.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

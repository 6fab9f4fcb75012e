//! Storage, metadata and thumbnail services.
//!
//! `object_store` and `asset_repository` define the seams to external
//! systems; `local_store` and `memory_store` implement the former.

pub mod asset_repository;
pub mod keyed_lock;
pub mod layout_manager;
pub mod local_store;
pub mod memory_store;
pub mod object_store;
pub mod size_calculator;
pub mod storage_keys;
pub mod thumbnail_service;

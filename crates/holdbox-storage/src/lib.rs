//! Holdbox Storage - Captured message store
//!
//! This crate stores captured messages byte-for-byte in SQLite and
//! exposes the repository used by the API, the SMTP capture listener
//! and the release pipeline.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;

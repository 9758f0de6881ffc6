//! Holdbox API - REST API server
//!
//! This crate provides the REST API for Holdbox: browsing captured
//! messages, read state, deletion and releasing a message to real
//! recipients through the configured relay.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;

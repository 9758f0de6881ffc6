//! Holdbox Common - Shared types and utilities
//!
//! This crate provides configuration, the shared error type and
//! identifier types used across all Holdbox components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

//! API request handlers

pub mod health;
pub mod messages;
pub mod release;

pub use health::*;

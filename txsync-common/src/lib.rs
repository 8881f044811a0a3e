//! # txsync Common Library
//!
//! Shared code for the txsync service and its tooling:
//! - Error type shared by all crates
//! - Sync event types and the broadcast EventBus
//! - TOML configuration loading and root folder resolution
//! - Database initialization (shared schema)

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod source;

pub use error::{Error, Result};
pub use source::SourceKind;

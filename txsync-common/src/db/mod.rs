//! Database initialization shared by txsync crates

pub mod init;

pub use init::{create_schema, create_settings_table, init_database, init_memory_database};

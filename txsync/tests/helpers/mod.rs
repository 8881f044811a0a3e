//! Test Helper Utilities
//!
//! Shared utilities for testing txsync

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;
pub mod snapshot;

pub use db_utils::{create_test_db, create_test_orchestrator, run_to_completion};
pub use fakes::{EchoProvider, FakeAdapter};
pub use snapshot::{typedstream_body, write_backup_snapshot, SnapshotMessage};

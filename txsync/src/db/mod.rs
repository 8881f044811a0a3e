//! Database access for txsync
//!
//! Every query against the shared SQLite store lives here. Internal row ids
//! never leave this module; callers address rows by `(source, external_id)`.

pub mod feedback;
pub mod records;
pub mod settings;
pub mod sync_runs;
pub mod watermarks;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use txsync_common::{Error, Result};

/// Open (or create) the database in the root folder
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    txsync_common::db::init_database(db_path).await
}

/// Fixed-width RFC 3339 text, so stored timestamps compare lexicographically
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_text_orders_like_time() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(
            parse_timestamp("ts", &format_timestamp(&late)).unwrap(),
            late
        );
    }
}

//! Sync watermark persistence
//!
//! Watermarks are written through [`advance_watermark`], which takes a
//! connection so it can share the transaction that stores the records the
//! watermark certifies. [`record_content_hash`] is the one write outside a
//! record commit and never touches `last_sync_at`.

use sqlx::{Row, SqliteConnection, SqlitePool};
use txsync_common::{Result, SourceKind};

use super::{format_timestamp, parse_timestamp};
use crate::models::SyncWatermark;

/// Load the stored watermark for a source, `None` before the first commit
pub async fn load_watermark(
    pool: &SqlitePool,
    source: SourceKind,
    owner_id: &str,
) -> Result<Option<SyncWatermark>> {
    let row = sqlx::query(
        "SELECT last_sync_at, content_hash FROM sync_watermarks WHERE source = ? AND owner_id = ?",
    )
    .bind(source.as_str())
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let last_sync_at: Option<String> = row.get("last_sync_at");
            let last_sync_at = last_sync_at
                .map(|s| parse_timestamp("last_sync_at", &s))
                .transpose()?;

            Ok(Some(SyncWatermark {
                source,
                owner_id: owner_id.to_string(),
                last_sync_at,
                content_hash: row.get("content_hash"),
            }))
        }
        None => Ok(None),
    }
}

/// Advance a watermark; never moves `last_sync_at` backwards
///
/// A `None` content hash keeps the stored one.
pub async fn advance_watermark(conn: &mut SqliteConnection, watermark: &SyncWatermark) -> Result<()> {
    let last_sync_at = watermark.last_sync_at.as_ref().map(format_timestamp);

    sqlx::query(
        r#"
        INSERT INTO sync_watermarks (source, owner_id, last_sync_at, content_hash, updated_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(source, owner_id) DO UPDATE SET
            last_sync_at = CASE
                WHEN sync_watermarks.last_sync_at IS NULL THEN excluded.last_sync_at
                WHEN excluded.last_sync_at > sync_watermarks.last_sync_at THEN excluded.last_sync_at
                ELSE sync_watermarks.last_sync_at
            END,
            content_hash = COALESCE(excluded.content_hash, sync_watermarks.content_hash),
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(watermark.source.as_str())
    .bind(&watermark.owner_id)
    .bind(last_sync_at)
    .bind(&watermark.content_hash)
    .execute(conn)
    .await?;

    Ok(())
}

/// Store a snapshot hash on its own, leaving `last_sync_at` unchanged
pub async fn record_content_hash(
    pool: &SqlitePool,
    source: SourceKind,
    owner_id: &str,
    content_hash: &str,
) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let watermark = SyncWatermark {
        source,
        owner_id: owner_id.to_string(),
        last_sync_at: None,
        content_hash: Some(content_hash.to_string()),
    };
    advance_watermark(&mut conn, &watermark).await
}

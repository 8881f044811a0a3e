//! Device backup: a message-store snapshot extracted from a device backup
//!
//! The snapshot is immutable, so it is content-addressed: its SHA-256 is
//! compared with the stored watermark hash and an unchanged snapshot is not
//! opened at all. The watermark timestamp is the newest message read, not
//! the wall-clock time of the sync.
//!
//! **Snapshot layout:**
//! - `message(ROWID, guid, text, attributedBody, date, handle_id, is_from_me)`
//! - `handle(ROWID, id)`
//! - `attachment(ROWID, guid, transfer_name, mime_type, total_bytes)`
//! - `message_attachment_join(message_id, attachment_id)`
//!
//! `date` counts from 2001-01-01 UTC, in nanoseconds (older stores: seconds).

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use txsync_common::SourceKind;

use super::{window_start, AdapterError, FetchOutcome, SourceAdapter};
use crate::models::{AttachmentRef, RawRecord, SyncWatermark};

pub const DEVICE_BACKUP_LOOKBACK_DAYS: i64 = 365;

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z
const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// `date` values above this are nanoseconds
const NANOSECOND_THRESHOLD: i64 = 100_000_000_000;

/// Reads messages from a backup snapshot
pub struct DeviceBackupAdapter {
    snapshot_path: PathBuf,
    owner_id: String,
}

impl DeviceBackupAdapter {
    pub fn new(snapshot_path: PathBuf, owner_id: impl Into<String>) -> Self {
        Self {
            snapshot_path,
            owner_id: owner_id.into(),
        }
    }

    async fn open_snapshot(&self) -> Result<SqlitePool, AdapterError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.snapshot_path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    async fn read_messages(
        &self,
        pool: &SqlitePool,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let since_ns = to_apple_nanos(since);

        let rows = sqlx::query(
            r#"
            SELECT m.guid, m.text, m.attributedBody, m.date, m.is_from_me, h.id AS handle
            FROM message m
            LEFT JOIN handle h ON h.ROWID = m.handle_id
            WHERE (CASE WHEN m.date > ? THEN m.date ELSE m.date * 1000000000 END) >= ?
            ORDER BY m.date
            "#,
        )
        .bind(NANOSECOND_THRESHOLD)
        .bind(since_ns)
        .fetch_all(pool)
        .await?;

        let mut attachments = self.read_attachments(pool, since_ns).await?;

        let records = rows
            .into_iter()
            .map(|row| {
                let guid: Option<String> = row.get("guid");
                let from_me: Option<i64> = row.get("is_from_me");
                let handle: Option<String> = row.get("handle");
                let date: Option<i64> = row.get("date");

                let sender = if from_me.unwrap_or(0) != 0 {
                    Some("me".to_string())
                } else {
                    handle
                };
                let message_attachments = guid
                    .as_ref()
                    .and_then(|g| attachments.remove(g))
                    .unwrap_or_default();

                RawRecord {
                    external_id: guid,
                    source: SourceKind::DeviceBackup,
                    plain_text: row.get("text"),
                    binary_body: row.get("attributedBody"),
                    timestamp: from_apple_date(date.unwrap_or(0)),
                    sender,
                    subject: None,
                    attachments: message_attachments,
                }
            })
            .collect();

        Ok(records)
    }

    /// Attachments of messages in the window, grouped by message guid
    async fn read_attachments(
        &self,
        pool: &SqlitePool,
        since_ns: i64,
    ) -> Result<HashMap<String, Vec<AttachmentRef>>, AdapterError> {
        let rows = sqlx::query(
            r#"
            SELECT a.guid, a.transfer_name, a.mime_type, a.total_bytes, m.guid AS message_guid
            FROM attachment a
            JOIN message_attachment_join j ON j.attachment_id = a.ROWID
            JOIN message m ON m.ROWID = j.message_id
            WHERE (CASE WHEN m.date > ? THEN m.date ELSE m.date * 1000000000 END) >= ?
            "#,
        )
        .bind(NANOSECOND_THRESHOLD)
        .bind(since_ns)
        .fetch_all(pool)
        .await?;

        let mut by_message: HashMap<String, Vec<AttachmentRef>> = HashMap::new();
        for row in rows {
            let attachment_guid: Option<String> = row.get("guid");
            let message_guid: Option<String> = row.get("message_guid");
            let (Some(external_id), Some(message_external_id)) = (attachment_guid, message_guid)
            else {
                // Links need both stable ids
                continue;
            };
            by_message
                .entry(message_external_id.clone())
                .or_default()
                .push(AttachmentRef {
                    external_id,
                    message_external_id,
                    filename: row.get("transfer_name"),
                    mime_type: row.get("mime_type"),
                    size_bytes: row.get("total_bytes"),
                });
        }
        Ok(by_message)
    }
}

#[async_trait]
impl SourceAdapter for DeviceBackupAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DeviceBackup
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lookback(&self) -> Duration {
        Duration::days(DEVICE_BACKUP_LOOKBACK_DAYS)
    }

    async fn fetch_since(
        &self,
        watermark: Option<&SyncWatermark>,
    ) -> Result<FetchOutcome, AdapterError> {
        let content_hash = snapshot_hash(&self.snapshot_path).await?;

        if watermark.and_then(|w| w.content_hash.as_deref()) == Some(content_hash.as_str()) {
            return Ok(FetchOutcome::Unchanged { content_hash });
        }

        let now = Utc::now();
        let since = window_start(watermark, self.lookback(), now);

        let pool = self.open_snapshot().await?;
        let result = self.read_messages(&pool, since).await;
        pool.close().await;
        let records = result?;

        tracing::debug!(
            path = %self.snapshot_path.display(),
            since = %since,
            count = records.len(),
            "Read backup snapshot"
        );

        // A later snapshot can carry messages older than the time of this
        // sync, so the watermark tracks the newest message actually read
        let newest = records.iter().map(|r| r.timestamp).max();
        let last_sync_at = newest.or_else(|| watermark.and_then(|w| w.last_sync_at));

        Ok(FetchOutcome::Records {
            records,
            next_watermark: SyncWatermark {
                source: SourceKind::DeviceBackup,
                owner_id: self.owner_id.clone(),
                last_sync_at,
                content_hash: Some(content_hash),
            },
        })
    }
}

/// SHA-256 of the snapshot file, computed on the blocking pool
pub async fn snapshot_hash(path: &Path) -> Result<String, AdapterError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String, AdapterError> {
        use std::io::Read;

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| AdapterError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
}

/// Convert a snapshot `date` value to UTC
pub fn from_apple_date(value: i64) -> DateTime<Utc> {
    let (secs, nanos) = if value.abs() > NANOSECOND_THRESHOLD {
        (value.div_euclid(1_000_000_000), value.rem_euclid(1_000_000_000))
    } else {
        (value, 0)
    };
    Utc.timestamp_opt(secs + APPLE_EPOCH_OFFSET_SECS, nanos as u32)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert UTC to snapshot nanoseconds
pub fn to_apple_nanos(ts: DateTime<Utc>) -> i64 {
    let secs = ts.timestamp() - APPLE_EPOCH_OFFSET_SECS;
    secs.saturating_mul(1_000_000_000)
        .saturating_add(ts.timestamp_subsec_nanos() as i64)
}

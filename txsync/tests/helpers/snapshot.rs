//! Device-backup snapshot fixtures

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use txsync::services::adapters::device_backup::to_apple_nanos;

/// One message row in a fixture snapshot
#[derive(Debug, Clone)]
pub struct SnapshotMessage {
    pub guid: String,
    pub text: Option<String>,
    pub attributed_body: Option<Vec<u8>>,
    pub date: DateTime<Utc>,
    pub handle: Option<String>,
    pub is_from_me: bool,
    /// (attachment guid, transfer name, mime type, size)
    pub attachments: Vec<(String, String, String, i64)>,
}

impl SnapshotMessage {
    pub fn text(guid: &str, text: &str, date: DateTime<Utc>) -> Self {
        Self {
            guid: guid.to_string(),
            text: Some(text.to_string()),
            attributed_body: None,
            date,
            handle: Some("+15550100".to_string()),
            is_from_me: false,
            attachments: Vec::new(),
        }
    }
}

/// Typedstream archive carrying `text` (short length form)
pub fn typedstream_body(text: &str) -> Vec<u8> {
    assert!(text.len() < 0x80, "fixture text must use the short length form");
    let mut body = b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01@\x84\x84\x84\x12NSAttributedString\x00\x84\x84\x08NSObject\x00\x85\x92\x84\x84\x84\x08NSString\x01\x94\x84\x01+".to_vec();
    body.push(text.len() as u8);
    body.extend_from_slice(text.as_bytes());
    body.extend_from_slice(b"\x86\x84\x02iI\x01");
    body
}

/// Write a snapshot database at `path` (replacing any existing file)
pub async fn write_backup_snapshot(path: &Path, messages: &[SnapshotMessage]) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    for ddl in [
        "CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT)",
        "CREATE TABLE message (ROWID INTEGER PRIMARY KEY, guid TEXT, text TEXT, attributedBody BLOB, date INTEGER, handle_id INTEGER, is_from_me INTEGER)",
        "CREATE TABLE attachment (ROWID INTEGER PRIMARY KEY, guid TEXT, transfer_name TEXT, mime_type TEXT, total_bytes INTEGER)",
        "CREATE TABLE message_attachment_join (message_id INTEGER, attachment_id INTEGER)",
    ] {
        sqlx::query(ddl).execute(&pool).await?;
    }

    for (index, message) in messages.iter().enumerate() {
        let rowid = index as i64 + 1;
        let handle_id = match &message.handle {
            Some(handle) => {
                sqlx::query("INSERT INTO handle (ROWID, id) VALUES (?, ?)")
                    .bind(rowid)
                    .bind(handle)
                    .execute(&pool)
                    .await?;
                Some(rowid)
            }
            None => None,
        };

        sqlx::query(
            "INSERT INTO message (ROWID, guid, text, attributedBody, date, handle_id, is_from_me) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rowid)
        .bind(&message.guid)
        .bind(&message.text)
        .bind(&message.attributed_body)
        .bind(to_apple_nanos(message.date))
        .bind(handle_id)
        .bind(message.is_from_me as i64)
        .execute(&pool)
        .await?;

        for (guid, name, mime, size) in &message.attachments {
            let result = sqlx::query(
                "INSERT INTO attachment (guid, transfer_name, mime_type, total_bytes) VALUES (?, ?, ?, ?)",
            )
            .bind(guid)
            .bind(name)
            .bind(mime)
            .bind(size)
            .execute(&pool)
            .await?;
            sqlx::query("INSERT INTO message_attachment_join (message_id, attachment_id) VALUES (?, ?)")
                .bind(rowid)
                .bind(result.last_insert_rowid())
                .execute(&pool)
                .await?;
        }
    }

    pool.close().await;
    Ok(())
}

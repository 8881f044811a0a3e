//! Record persistence
//!
//! `commit_batch` is the atomic "insert records and advance watermark" unit:
//! records, their attachments, their classification outcomes and the new
//! watermark are written in one transaction, watermark last.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use txsync_common::{Error, Result, SourceKind};

use super::{format_timestamp, parse_timestamp, watermarks};
use crate::models::{
    BatchOutcome, ClassificationResult, ClassifierIdentity, ExtractedRecord, RecordError,
    SyncWatermark,
};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// One atomic commit
#[derive(Debug, Clone, Copy)]
pub struct CommitBatch<'a> {
    pub source: SourceKind,
    pub records: &'a [ExtractedRecord],
    pub outcome: &'a BatchOutcome,
    pub classifier: &'a ClassifierIdentity,
    /// Watermark value certified once these records are stored
    pub watermark: &'a SyncWatermark,
}

/// Row counts from one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Newly stored records (classified or with failure placeholder)
    pub inserted: usize,
    /// Records whose key was already stored (lost a race with another writer)
    pub already_present: usize,
    /// Newly stored records whose classification failed
    pub classification_failed: usize,
}

/// Stored record as read back for callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub source: String,
    pub external_id: String,
    pub dedup_key: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub body_text: String,
    pub extraction_method: String,
    pub occurred_at: DateTime<Utc>,
    pub classification_status: Option<String>,
    pub is_transaction_related: Option<bool>,
    pub confidence: Option<f64>,
}

/// Commit a batch of records and advance the watermark in one transaction
///
/// Retries on transient lock contention; any other failure rolls the whole
/// unit back, leaving the previous watermark in place.
pub async fn commit_batch(pool: &SqlitePool, batch: CommitBatch<'_>) -> Result<CommitStats> {
    let max_wait_ms = max_lock_wait_ms(pool).await?;
    retry_on_lock("commit_batch", max_wait_ms, || commit_batch_once(pool, batch)).await
}

async fn commit_batch_once(pool: &SqlitePool, batch: CommitBatch<'_>) -> Result<CommitStats> {
    let results: HashMap<&str, &ClassificationResult> = batch
        .outcome
        .results
        .iter()
        .map(|r| (r.record_external_id.as_str(), r))
        .collect();
    let errors: HashMap<&str, &RecordError> = batch
        .outcome
        .errors
        .iter()
        .map(|e| (e.external_id.as_str(), e))
        .collect();

    let imported_at = format_timestamp(&Utc::now());
    let mut stats = CommitStats::default();
    let mut tx = pool.begin().await?;

    for record in batch.records {
        let inserted = sqlx::query(
            r#"
            INSERT INTO records (
                source, external_id, dedup_key, sender, subject,
                body_text, extraction_method, occurred_at, imported_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(batch.source.as_str())
        .bind(&record.external_id)
        .bind(&record.dedup_key)
        .bind(&record.raw.sender)
        .bind(&record.raw.subject)
        .bind(&record.text)
        .bind(record.extraction_method.as_str())
        .bind(format_timestamp(&record.raw.timestamp))
        .bind(&imported_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            stats.already_present += 1;
            continue;
        }
        stats.inserted += 1;

        for attachment in &record.raw.attachments {
            sqlx::query(
                r#"
                INSERT INTO attachments (
                    source, external_id, message_external_id, filename, mime_type, size_bytes
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(batch.source.as_str())
            .bind(&attachment.external_id)
            .bind(&attachment.message_external_id)
            .bind(&attachment.filename)
            .bind(&attachment.mime_type)
            .bind(attachment.size_bytes)
            .execute(&mut *tx)
            .await?;
        }

        let external_id = record.external_id.as_str();
        let (status, related, confidence, fields, error) = match results.get(external_id) {
            Some(result) => (
                "classified",
                Some(result.is_transaction_related),
                Some(result.confidence),
                serde_json::Value::Object(result.extracted_fields.clone()).to_string(),
                None,
            ),
            None => {
                stats.classification_failed += 1;
                let message = errors
                    .get(external_id)
                    .map(|e| e.error.clone())
                    .unwrap_or_else(|| "no classification produced".to_string());
                ("failed", None, None, "{}".to_string(), Some(message))
            }
        };

        sqlx::query(
            r#"
            INSERT INTO classifications (
                dedup_key, source, record_external_id, status, is_transaction_related,
                confidence, extracted_fields, error, provider, model_version,
                prompt_version, classified_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dedup_key) DO NOTHING
            "#,
        )
        .bind(&record.dedup_key)
        .bind(batch.source.as_str())
        .bind(external_id)
        .bind(status)
        .bind(related)
        .bind(confidence)
        .bind(fields)
        .bind(error)
        .bind(&batch.classifier.provider)
        .bind(&batch.classifier.model_version)
        .bind(&batch.classifier.prompt_version)
        .bind(&imported_at)
        .execute(&mut *tx)
        .await?;
    }

    watermarks::advance_watermark(&mut *tx, batch.watermark).await?;

    tx.commit().await?;

    tracing::debug!(
        source = %batch.source,
        inserted = stats.inserted,
        already_present = stats.already_present,
        "Batch committed and watermark advanced"
    );

    Ok(stats)
}

/// Whether a dedup key is already stored
pub async fn key_exists(pool: &SqlitePool, dedup_key: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM records WHERE dedup_key = ? LIMIT 1")
        .bind(dedup_key)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Number of stored records for a source
pub async fn count_records(pool: &SqlitePool, source: SourceKind) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE source = ?")
        .bind(source.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Load one record by its stable key
pub async fn get_record(
    pool: &SqlitePool,
    source: SourceKind,
    external_id: &str,
) -> Result<Option<StoredRecord>> {
    let row = sqlx::query(
        r#"
        SELECT r.source, r.external_id, r.dedup_key, r.sender, r.subject, r.body_text,
               r.extraction_method, r.occurred_at,
               c.status AS classification_status, c.is_transaction_related, c.confidence
        FROM records r
        LEFT JOIN classifications c ON c.dedup_key = r.dedup_key
        WHERE r.source = ? AND r.external_id = ?
        "#,
    )
    .bind(source.as_str())
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let occurred_at: String = row.get("occurred_at");
        Ok(StoredRecord {
            source: row.get("source"),
            external_id: row.get("external_id"),
            dedup_key: row.get("dedup_key"),
            sender: row.get("sender"),
            subject: row.get("subject"),
            body_text: row.get("body_text"),
            extraction_method: row.get("extraction_method"),
            occurred_at: parse_timestamp("occurred_at", &occurred_at)?,
            classification_status: row.get("classification_status"),
            is_transaction_related: row.get("is_transaction_related"),
            confidence: row.get("confidence"),
        })
    })
    .transpose()
}

/// External ids of attachments linked to a message
pub async fn attachment_ids_for_message(
    pool: &SqlitePool,
    source: SourceKind,
    message_external_id: &str,
) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT external_id FROM attachments WHERE source = ? AND message_external_id = ? ORDER BY external_id",
    )
    .bind(source.as_str())
    .bind(message_external_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::watermarks::load_watermark;
    use crate::models::{AttachmentRef, ExtractionMethod, RawRecord};
    use txsync_common::db::init_memory_database;

    fn extracted(external_id: &str, text: &str) -> ExtractedRecord {
        let mut raw = RawRecord::text(SourceKind::DeviceBackup, external_id, text, Utc::now());
        raw.attachments.push(AttachmentRef {
            external_id: format!("{}-att", external_id),
            message_external_id: external_id.to_string(),
            filename: Some("receipt.pdf".to_string()),
            mime_type: Some("application/pdf".to_string()),
            size_bytes: Some(1024),
        });
        ExtractedRecord {
            raw,
            external_id: external_id.to_string(),
            dedup_key: format!("device-backup:{}", external_id),
            text: text.to_string(),
            extraction_method: ExtractionMethod::Direct,
        }
    }

    fn identity() -> ClassifierIdentity {
        ClassifierIdentity {
            provider: "test".to_string(),
            model_version: "m1".to_string(),
            prompt_version: "p1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commit_stores_records_classifications_and_watermark() {
        let pool = init_memory_database().await.unwrap();
        let records = vec![extracted("g1", "Your order shipped"), extracted("g2", "lunch?")];
        let outcome = BatchOutcome {
            results: vec![ClassificationResult {
                record_external_id: "g1".to_string(),
                is_transaction_related: true,
                confidence: 0.9,
                extracted_fields: serde_json::Map::new(),
            }],
            errors: vec![RecordError {
                external_id: "g2".to_string(),
                error: "unparseable".to_string(),
            }],
        };
        let mut watermark = SyncWatermark::initial(SourceKind::DeviceBackup, "me");
        watermark.last_sync_at = Some(Utc::now());
        watermark.content_hash = Some("hash-1".to_string());

        let stats = commit_batch(
            &pool,
            CommitBatch {
                source: SourceKind::DeviceBackup,
                records: &records,
                outcome: &outcome,
                classifier: &identity(),
                watermark: &watermark,
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.classification_failed, 1);

        let g1 = get_record(&pool, SourceKind::DeviceBackup, "g1").await.unwrap().unwrap();
        assert_eq!(g1.classification_status.as_deref(), Some("classified"));
        assert_eq!(g1.is_transaction_related, Some(true));

        let g2 = get_record(&pool, SourceKind::DeviceBackup, "g2").await.unwrap().unwrap();
        assert_eq!(g2.classification_status.as_deref(), Some("failed"));

        let attachments = attachment_ids_for_message(&pool, SourceKind::DeviceBackup, "g1")
            .await
            .unwrap();
        assert_eq!(attachments, vec!["g1-att".to_string()]);

        let stored = load_watermark(&pool, SourceKind::DeviceBackup, "me")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content_hash.as_deref(), Some("hash-1"));
    }

    #[tokio::test]
    async fn test_recommit_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        let records = vec![extracted("g1", "Invoice")];
        let outcome = BatchOutcome::default();
        let watermark = SyncWatermark::initial(SourceKind::DeviceBackup, "me");
        let batch = CommitBatch {
            source: SourceKind::DeviceBackup,
            records: &records,
            outcome: &outcome,
            classifier: &identity(),
            watermark: &watermark,
        };

        commit_batch(&pool, batch).await.unwrap();
        let stats = commit_batch(&pool, batch).await.unwrap();

        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.already_present, 1);
        assert_eq!(count_records(&pool, SourceKind::DeviceBackup).await.unwrap(), 1);
        assert!(key_exists(&pool, "device-backup:g1").await.unwrap());
        assert!(!key_exists(&pool, "device-backup:g9").await.unwrap());
    }
}

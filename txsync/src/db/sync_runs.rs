//! Sync run history

use sqlx::{Row, SqlitePool};
use txsync_common::{Error, Result};

use super::format_timestamp;
use crate::models::SyncSummary;

/// Persist the summary of a finished run (replaces an earlier row for the same run)
pub async fn save_run(pool: &SqlitePool, summary: &SyncSummary) -> Result<()> {
    let json = serde_json::to_string(summary)
        .map_err(|e| Error::Internal(format!("Failed to serialize run summary: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO sync_runs (run_id, started_at, ended_at, cancelled, summary)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            ended_at = excluded.ended_at,
            cancelled = excluded.cancelled,
            summary = excluded.summary
        "#,
    )
    .bind(summary.run_id.to_string())
    .bind(format_timestamp(&summary.started_at))
    .bind(summary.ended_at.as_ref().map(format_timestamp))
    .bind(summary.cancelled)
    .bind(json)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent runs, newest first
pub async fn list_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<SyncSummary>> {
    let rows = sqlx::query("SELECT summary FROM sync_runs ORDER BY started_at DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|row| {
            let json: String = row.get("summary");
            serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("Corrupt run summary: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PhaseOutcome, SourceSummary};
    use chrono::{Duration, Utc};
    use txsync_common::db::init_memory_database;
    use txsync_common::SourceKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_runs_listed_newest_first() {
        let pool = init_memory_database().await.unwrap();

        let mut older = SyncSummary::new(Uuid::new_v4());
        older.started_at = Utc::now() - Duration::minutes(5);
        older.ended_at = Some(older.started_at + Duration::seconds(3));
        save_run(&pool, &older).await.unwrap();

        let mut newer = SyncSummary::new(Uuid::new_v4());
        let mut email = SourceSummary::new(SourceKind::EmailProvider, PhaseOutcome::Completed);
        email.imported = 7;
        newer.sources.push(email);
        newer.ended_at = Some(Utc::now());
        save_run(&pool, &newer).await.unwrap();

        let runs = list_runs(&pool, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, newer.run_id);
        assert_eq!(runs[0].total_imported(), 7);

        assert_eq!(list_runs(&pool, 1).await.unwrap().len(), 1);
    }
}

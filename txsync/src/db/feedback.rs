//! Feedback persistence and aggregation queries

use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use txsync_common::Result;

use super::format_timestamp;
use crate::models::{AccuracyStats, FeedbackAction, FeedbackEntry};

/// Column feedback is grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackGrouping {
    Provider,
    PromptVersion,
}

impl FeedbackGrouping {
    fn column(&self) -> &'static str {
        match self {
            FeedbackGrouping::Provider => "provider",
            FeedbackGrouping::PromptVersion => "prompt_version",
        }
    }
}

/// Store one feedback entry
pub async fn insert_feedback(pool: &SqlitePool, entry: &FeedbackEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO feedback (
            record_external_id, action, original_value, corrected_value, reason,
            provider, model_version, prompt_version, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.record_external_id)
    .bind(entry.action.as_str())
    .bind(&entry.original_value)
    .bind(&entry.corrected_value)
    .bind(&entry.reason)
    .bind(&entry.provider)
    .bind(&entry.model_version)
    .bind(&entry.prompt_version)
    .bind(format_timestamp(&entry.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Approval and rejection counts per grouping key
///
/// Rows are counted per action; [`FeedbackAction::is_approval`] decides
/// which side each action lands on.
pub async fn accuracy_grouped(
    pool: &SqlitePool,
    grouping: FeedbackGrouping,
) -> Result<BTreeMap<String, AccuracyStats>> {
    // Column name comes from a closed enum, never from input
    let sql = format!(
        "SELECT {col} AS group_key, action, COUNT(*) AS n FROM feedback GROUP BY {col}, action",
        col = grouping.column()
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut counts: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for row in rows {
        let key: String = row.get("group_key");
        let action: String = row.get("action");
        let n: i64 = row.get("n");
        let n = n.max(0) as u64;

        let entry = counts.entry(key).or_default();
        if action.parse::<FeedbackAction>()?.is_approval() {
            entry.0 += n;
        } else {
            entry.1 += n;
        }
    }

    Ok(counts
        .into_iter()
        .map(|(key, (approvals, rejections))| {
            (key, AccuracyStats::from_counts(approvals, rejections))
        })
        .collect())
}

/// Reasons attached to rejecting feedback (reject and edit)
pub async fn rejection_reasons(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT action, reason FROM feedback
        WHERE reason IS NOT NULL AND TRIM(reason) <> ''
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut reasons = Vec::new();
    for row in rows {
        let action: String = row.get("action");
        if !action.parse::<FeedbackAction>()?.is_approval() {
            reasons.push(row.get("reason"));
        }
    }
    Ok(reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use txsync_common::db::init_memory_database;

    fn entry(action: FeedbackAction, provider: &str, prompt: &str, reason: Option<&str>) -> FeedbackEntry {
        FeedbackEntry {
            record_external_id: "msg-1".to_string(),
            action,
            original_value: Some("true".to_string()),
            corrected_value: None,
            reason: reason.map(str::to_string),
            provider: provider.to_string(),
            model_version: "m1".to_string(),
            prompt_version: prompt.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_grouped_counts() {
        let pool = init_memory_database().await.unwrap();
        insert_feedback(&pool, &entry(FeedbackAction::Accept, "a", "v1", None)).await.unwrap();
        // Reasons on approvals are not rejection reasons
        insert_feedback(&pool, &entry(FeedbackAction::Accept, "a", "v1", Some("looks right")))
            .await
            .unwrap();
        insert_feedback(&pool, &entry(FeedbackAction::Accept, "a", "v2", None)).await.unwrap();
        insert_feedback(&pool, &entry(FeedbackAction::Edit, "a", "v2", Some("wrong amount")))
            .await
            .unwrap();
        insert_feedback(&pool, &entry(FeedbackAction::Reject, "b", "v2", Some("newsletter")))
            .await
            .unwrap();

        let by_provider = accuracy_grouped(&pool, FeedbackGrouping::Provider).await.unwrap();
        assert_eq!(by_provider["a"].approvals, 3);
        assert_eq!(by_provider["a"].rejections, 1);
        assert_eq!(by_provider["b"].rate, 0.0);

        let by_prompt = accuracy_grouped(&pool, FeedbackGrouping::PromptVersion).await.unwrap();
        assert_eq!(by_prompt["v1"].rate, 1.0);
        assert_eq!(by_prompt["v2"].approvals, 1);

        let reasons = rejection_reasons(&pool).await.unwrap();
        assert_eq!(reasons, vec!["wrong amount".to_string(), "newsletter".to_string()]);
    }
}

//! Feedback and accuracy tracking
//!
//! Stores user accept/reject/edit feedback against classifications and
//! aggregates it per provider and per prompt version. Recurring rejection
//! reasons are surfaced as systematic errors.

use sqlx::{Pool, Sqlite};
use std::collections::{BTreeMap, HashMap};
use txsync_common::{Error, Result};

use crate::db::feedback::{self as feedback_db, FeedbackGrouping};
use crate::models::{AccuracyStats, FeedbackEntry, SystematicError};

/// A rejection reason seen more often than this is systematic
pub const SYSTEMATIC_ERROR_THRESHOLD: u64 = 3;

/// Feedback tracker over the shared store
#[derive(Clone)]
pub struct FeedbackTracker {
    db: Pool<Sqlite>,
}

impl FeedbackTracker {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Record one feedback entry
    pub async fn record_feedback(&self, entry: &FeedbackEntry) -> Result<()> {
        if entry.record_external_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "record_external_id must not be empty".to_string(),
            ));
        }

        feedback_db::insert_feedback(&self.db, entry).await?;
        tracing::info!(
            record = %entry.record_external_id,
            action = %entry.action,
            provider = %entry.provider,
            prompt_version = %entry.prompt_version,
            "Feedback recorded"
        );
        Ok(())
    }

    pub async fn accuracy_by_provider(&self) -> Result<BTreeMap<String, AccuracyStats>> {
        feedback_db::accuracy_grouped(&self.db, FeedbackGrouping::Provider).await
    }

    pub async fn accuracy_by_prompt_version(&self) -> Result<BTreeMap<String, AccuracyStats>> {
        feedback_db::accuracy_grouped(&self.db, FeedbackGrouping::PromptVersion).await
    }

    /// Rejection reasons recurring more than [`SYSTEMATIC_ERROR_THRESHOLD`] times
    pub async fn identify_systematic_errors(&self) -> Result<Vec<SystematicError>> {
        let reasons = feedback_db::rejection_reasons(&self.db).await?;
        Ok(group_reasons(&reasons, SYSTEMATIC_ERROR_THRESHOLD))
    }
}

/// Group normalized reasons and keep those above `threshold`, most frequent first
pub fn group_reasons(reasons: &[String], threshold: u64) -> Vec<SystematicError> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for reason in reasons {
        let normalized = normalize_reason(reason);
        if !normalized.is_empty() {
            *counts.entry(normalized).or_insert(0) += 1;
        }
    }

    let mut flagged: Vec<SystematicError> = counts
        .into_iter()
        .filter(|(_, frequency)| *frequency > threshold)
        .map(|(pattern, frequency)| SystematicError {
            suggestion: format!(
                "Recurring rejection \"{}\" ({} times): add counter-examples for this case to the classification prompt and review the affected records",
                pattern, frequency
            ),
            pattern,
            frequency,
        })
        .collect();

    flagged.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
    flagged
}

fn normalize_reason(reason: &str) -> String {
    reason
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

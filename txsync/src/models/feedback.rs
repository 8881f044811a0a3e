//! Feedback entries and accuracy statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the user did with a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Accept,
    Reject,
    Edit,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Accept => "accept",
            FeedbackAction::Reject => "reject",
            FeedbackAction::Edit => "edit",
        }
    }

    /// Accept counts toward approvals; reject and edit toward rejections
    pub fn is_approval(&self) -> bool {
        matches!(self, FeedbackAction::Accept)
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackAction {
    type Err = txsync_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(FeedbackAction::Accept),
            "reject" => Ok(FeedbackAction::Reject),
            "edit" => Ok(FeedbackAction::Edit),
            other => Err(txsync_common::Error::InvalidInput(format!(
                "Unknown feedback action: {}",
                other
            ))),
        }
    }
}

/// User correction of one classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub record_external_id: String,
    pub action: FeedbackAction,
    pub original_value: Option<String>,
    pub corrected_value: Option<String>,
    /// Free-text rejection reason
    pub reason: Option<String>,
    pub provider: String,
    pub model_version: String,
    pub prompt_version: String,
    pub created_at: DateTime<Utc>,
}

/// Approval statistics for one grouping key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyStats {
    pub approvals: u64,
    pub rejections: u64,
    /// approvals / (approvals + rejections), 0 when there is no feedback
    pub rate: f64,
}

impl AccuracyStats {
    pub fn from_counts(approvals: u64, rejections: u64) -> Self {
        let total = approvals + rejections;
        let rate = if total == 0 {
            0.0
        } else {
            approvals as f64 / total as f64
        };
        Self {
            approvals,
            rejections,
            rate,
        }
    }
}

/// Recurring rejection reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicError {
    pub pattern: String,
    pub frequency: u64,
    pub suggestion: String,
}

//! Classification batch and result types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ExtractedRecord;

/// Group of records sent to the classifier in one call
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    pub items: Vec<ExtractedRecord>,
    pub estimated_tokens: usize,
}

/// Canonical classification of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub record_external_id: String,
    pub is_transaction_related: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub extracted_fields: serde_json::Map<String, serde_json::Value>,
}

/// Record that could not be classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub external_id: String,
    pub error: String,
}

/// Outcome of classifying a set of records
///
/// `results.len() + errors.len()` always equals the number of input records.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<ClassificationResult>,
    pub errors: Vec<RecordError>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend(&mut self, other: BatchOutcome) {
        self.results.extend(other.results);
        self.errors.extend(other.errors);
    }
}

/// Which provider, model and prompt produced a classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierIdentity {
    pub provider: String,
    pub model_version: String,
    pub prompt_version: String,
}

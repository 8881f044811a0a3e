//! Batch classifier
//!
//! Packs extracted records into token-bounded batches, issues one provider
//! call per batch and maps the response items back onto the records.
//!
//! **Correlation:**
//! 1. Every record is sent with its external id as `"id"`; items echoing a
//!    known id are matched by id (order irrelevant)
//! 2. Items without an id are matched positionally, only onto records still
//!    unmatched at that index
//! 3. A single-record call accepts a single item whatever its id
//! 4. Records left unmatched become errors
//!
//! Errors are retried once with single-record prompts. For every input
//! record exactly one result or one error is returned.

pub mod provider;
pub mod response_parser;

pub use provider::{ChatCompletionsProvider, ClassificationProvider, ClassifierError};
pub use response_parser::{parse_response, ParsedItem};

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{
    Batch, BatchOutcome, ClassificationResult, ClassifierIdentity, ExtractedRecord, RecordError,
};

/// Version tag of the prompt below; recorded with every classification
pub const PROMPT_VERSION: &str = "txsync-classify-v1";

/// Default token ceiling per batch
pub const DEFAULT_BATCH_TOKEN_BUDGET: usize = 4000;

/// Tokens charged per record for its JSON framing
pub const PER_ITEM_OVERHEAD_TOKENS: usize = 24;

/// Tokens charged once per batch for the instructions
pub const PROMPT_OVERHEAD_TOKENS: usize = 200;

/// Longer record texts are truncated to this many characters
pub const MAX_ITEM_CHARS: usize = 4000;

const INSTRUCTIONS: &str = "Decide for each record below whether it relates to a real-world \
transaction (purchase, order, payment, invoice, receipt, booking, refund, subscription, delivery).\n\
Respond with ONLY a JSON array holding one object per record, in any order:\n\
{\"id\": \"<the record id, copied exactly>\", \"is_transaction_related\": true|false, \
\"confidence\": <0.0-1.0>, \"extracted_fields\": {\"merchant\": ..., \"amount\": ..., \
\"currency\": ..., \"date\": ..., \"order_number\": ...}}\n\
Omit extracted fields that are not present.\n\nRecords:\n";

/// Estimated token cost of one record: `ceil(chars / 4)` plus framing
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count().min(MAX_ITEM_CHARS);
    (chars + 3) / 4 + PER_ITEM_OVERHEAD_TOKENS
}

/// Classifies extracted records through a [`ClassificationProvider`]
pub struct BatchClassifier {
    provider: Arc<dyn ClassificationProvider>,
    token_budget: usize,
}

impl BatchClassifier {
    pub fn new(provider: Arc<dyn ClassificationProvider>, token_budget: usize) -> Self {
        Self {
            provider,
            token_budget,
        }
    }

    /// Provider, model and prompt version stamped on results
    pub fn identity(&self) -> ClassifierIdentity {
        ClassifierIdentity {
            provider: self.provider.provider_name().to_string(),
            model_version: self.provider.model_version().to_string(),
            prompt_version: PROMPT_VERSION.to_string(),
        }
    }

    /// Greedily pack records, in order, into batches under the token budget
    ///
    /// A record that alone exceeds the budget gets a batch of its own.
    pub fn pack(&self, records: Vec<ExtractedRecord>) -> Vec<Batch> {
        let capacity = self.token_budget.saturating_sub(PROMPT_OVERHEAD_TOKENS);
        let mut batches = Vec::new();
        let mut items: Vec<ExtractedRecord> = Vec::new();
        let mut used = 0usize;

        for record in records {
            let cost = estimate_tokens(&record.text);
            if !items.is_empty() && used + cost > capacity {
                batches.push(Batch {
                    id: Uuid::new_v4(),
                    items: std::mem::take(&mut items),
                    estimated_tokens: used + PROMPT_OVERHEAD_TOKENS,
                });
                used = 0;
            }
            used += cost;
            items.push(record);
        }

        if !items.is_empty() {
            batches.push(Batch {
                id: Uuid::new_v4(),
                items,
                estimated_tokens: used + PROMPT_OVERHEAD_TOKENS,
            });
        }

        batches
    }

    /// Classify one batch, retrying errors individually once
    ///
    /// `results.len() + errors.len() == records.len()` always holds.
    pub async fn classify_batch(&self, records: &[ExtractedRecord]) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::default();
        }

        let mut outcome = self.call(records).await;
        if outcome.errors.is_empty() {
            return outcome;
        }

        tracing::info!(
            batch_size = records.len(),
            errors = outcome.errors.len(),
            "Reprocessing unclassified records individually"
        );

        let by_id: HashMap<&str, &ExtractedRecord> = records
            .iter()
            .map(|r| (r.external_id.as_str(), r))
            .collect();

        let failed = std::mem::take(&mut outcome.errors);
        for error in failed {
            let Some(record) = by_id.get(error.external_id.as_str()) else {
                outcome.errors.push(error);
                continue;
            };

            let retry = self.call(std::slice::from_ref(*record)).await;
            match retry.results.into_iter().next() {
                Some(result) => outcome.results.push(result),
                None => {
                    let reason = retry
                        .errors
                        .into_iter()
                        .next()
                        .map(|e| e.error)
                        .unwrap_or_else(|| "no result".to_string());
                    tracing::warn!(
                        external_id = %error.external_id,
                        error = %reason,
                        "Record still unclassified after individual retry"
                    );
                    outcome.errors.push(RecordError {
                        external_id: error.external_id,
                        error: format!("{} (individual retry: {})", error.error, reason),
                    });
                }
            }
        }

        outcome
    }

    /// One provider call for `records`, no retry
    async fn call(&self, records: &[ExtractedRecord]) -> BatchOutcome {
        let prompt = build_prompt(records);

        let text = match self.provider.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(batch_size = records.len(), error = %e, "Classifier call failed");
                return all_failed(records, &format!("classifier call failed: {}", e));
            }
        };

        match parse_response(&text) {
            Ok(items) => correlate(records, items),
            Err(e) => {
                let failure = SyncError::BatchCorrelation(e.to_string());
                tracing::warn!(
                    batch_size = records.len(),
                    error = %failure,
                    "Unparseable classifier response"
                );
                all_failed(records, &failure.to_string())
            }
        }
    }
}

fn all_failed(records: &[ExtractedRecord], message: &str) -> BatchOutcome {
    BatchOutcome {
        results: Vec::new(),
        errors: records
            .iter()
            .map(|r| RecordError {
                external_id: r.external_id.clone(),
                error: message.to_string(),
            })
            .collect(),
    }
}

/// Prompt with each record's external id embedded as `"id"`
pub fn build_prompt(records: &[ExtractedRecord]) -> String {
    let payload: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            let text: String = r.text.chars().take(MAX_ITEM_CHARS).collect();
            json!({
                "id": r.external_id,
                "source": r.source().as_str(),
                "sender": r.raw.sender,
                "subject": r.raw.subject,
                "text": text,
            })
        })
        .collect();

    let records_json = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "[]".to_string());
    format!("{}{}", INSTRUCTIONS, records_json)
}

/// Map response items onto records (id first, then position)
pub fn correlate(records: &[ExtractedRecord], items: Vec<ParsedItem>) -> BatchOutcome {
    if items.len() != records.len() {
        tracing::warn!(
            expected = records.len(),
            received = items.len(),
            "Classifier response length mismatch"
        );
    }

    let index: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.external_id.as_str(), i))
        .collect();
    let mut matched: Vec<Option<ParsedItem>> = vec![None; records.len()];
    let mut positional = Vec::new();
    let mut unknown = Vec::new();

    for item in items {
        match item.id.as_deref() {
            Some(id) => match index.get(id) {
                Some(&i) if matched[i].is_none() => matched[i] = Some(item),
                Some(_) => tracing::warn!(id, "Duplicate classifier item dropped"),
                None => unknown.push(item),
            },
            None => positional.push(item),
        }
    }

    // Slots follow the item's index in the raw response, so a skipped item
    // leaves its record unmatched instead of shifting the rest
    for item in positional {
        let position = item.position;
        match matched.get_mut(position) {
            Some(slot) if slot.is_none() => *slot = Some(item),
            _ => tracing::warn!(position, "Unplaceable classifier item dropped"),
        }
    }

    // A lone record with a lone answer needs no id (models rewrite ids,
    // e.g. stripping the brackets of a Message-ID)
    if records.len() == 1 && matched[0].is_none() && unknown.len() == 1 {
        matched[0] = unknown.pop();
    }
    for item in unknown {
        tracing::warn!(id = ?item.id, "Classifier item with unknown id dropped");
    }

    let mut outcome = BatchOutcome::default();
    for (record, item) in records.iter().zip(matched) {
        match item {
            Some(item) => outcome.results.push(ClassificationResult {
                record_external_id: record.external_id.clone(),
                is_transaction_related: item.is_transaction_related,
                confidence: item.confidence,
                extracted_fields: item.extracted_fields,
            }),
            None => outcome.errors.push(RecordError {
                external_id: record.external_id.clone(),
                error: "no classification returned for record".to_string(),
            }),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionMethod, RawRecord};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use txsync_common::SourceKind;

    struct Scripted {
        responses: Mutex<VecDeque<Result<String, ClassifierError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, ClassifierError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ClassificationProvider for Scripted {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_version(&self) -> &str {
            "v0"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClassifierError::Parse("script exhausted".to_string())))
        }
    }

    fn record(id: &str, text: &str) -> ExtractedRecord {
        ExtractedRecord {
            raw: RawRecord::text(SourceKind::EmailProvider, id, text, Utc::now()),
            external_id: id.to_string(),
            dedup_key: format!("email-provider:{}", id),
            text: text.to_string(),
            extraction_method: ExtractionMethod::Direct,
        }
    }

    fn item(position: usize, id: Option<&str>, related: bool) -> ParsedItem {
        ParsedItem {
            position,
            id: id.map(str::to_string),
            is_transaction_related: related,
            confidence: 0.8,
            extracted_fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), PER_ITEM_OVERHEAD_TOKENS);
        assert_eq!(estimate_tokens("abcde"), 2 + PER_ITEM_OVERHEAD_TOKENS);
        let huge = "x".repeat(MAX_ITEM_CHARS * 3);
        assert_eq!(estimate_tokens(&huge), MAX_ITEM_CHARS / 4 + PER_ITEM_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_pack_respects_budget() {
        let classifier = BatchClassifier::new(Scripted::new(vec![]), PROMPT_OVERHEAD_TOKENS + 200);
        // Each record costs 100 / 4 + 24 = 49 tokens; four fit in 200
        let records: Vec<_> = (0..10)
            .map(|i| record(&format!("r{}", i), &"y".repeat(100)))
            .collect();

        let batches = classifier.pack(records);
        let sizes: Vec<usize> = batches.iter().map(|b| b.items.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(batches
            .iter()
            .all(|b| b.estimated_tokens <= PROMPT_OVERHEAD_TOKENS + 200));
    }

    #[test]
    fn test_oversize_record_gets_own_batch() {
        let classifier = BatchClassifier::new(Scripted::new(vec![]), PROMPT_OVERHEAD_TOKENS + 60);
        let records = vec![
            record("a", "short"),
            record("b", &"z".repeat(2000)),
            record("c", "short"),
        ];
        let sizes: Vec<usize> = classifier.pack(records).iter().map(|b| b.items.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn test_correlate_prefers_ids_over_order() {
        let records = vec![record("a", "1"), record("b", "2"), record("c", "3")];
        let items = vec![
            item(0, Some("c"), true),
            item(1, Some("a"), false),
            item(2, Some("b"), true),
        ];
        let outcome = correlate(&records, items);
        assert!(outcome.errors.is_empty());
        let a = outcome
            .results
            .iter()
            .find(|r| r.record_external_id == "a")
            .unwrap();
        assert!(!a.is_transaction_related);
    }

    #[test]
    fn test_correlate_short_positional_response() {
        let records: Vec<_> = (0..5).map(|i| record(&format!("r{}", i), "text")).collect();
        let items = (0..4).map(|i| item(i, None, true)).collect();
        let outcome = correlate(&records, items);
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].external_id, "r4");
    }

    #[test]
    fn test_correlate_skipped_item_does_not_shift_positions() {
        let records: Vec<_> = (0..3).map(|i| record(&format!("r{}", i), "text")).collect();
        let items = parse_response(
            r#"[{"confidence":0.5},
                {"is_transaction_related":true,"confidence":0.9},
                {"is_transaction_related":false,"confidence":0.1}]"#,
        )
        .unwrap();

        let outcome = correlate(&records, items);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].external_id, "r0");

        let r1 = outcome
            .results
            .iter()
            .find(|r| r.record_external_id == "r1")
            .unwrap();
        assert!(r1.is_transaction_related);
        assert!((r1.confidence - 0.9).abs() < 1e-9);
        let r2 = outcome
            .results
            .iter()
            .find(|r| r.record_external_id == "r2")
            .unwrap();
        assert!(!r2.is_transaction_related);
    }

    #[test]
    fn test_correlate_single_record_accepts_rewritten_id() {
        let records = vec![record("<m1@shop>", "Your receipt")];
        let outcome = correlate(&records, vec![item(0, Some("m1@shop"), true)]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.results[0].record_external_id, "<m1@shop>");
    }

    #[test]
    fn test_correlate_drops_unknown_and_duplicate_ids() {
        let records = vec![record("a", "1"), record("b", "2")];
        let items = vec![
            item(0, Some("a"), true),
            item(1, Some("a"), false),
            item(2, Some("zz"), true),
        ];
        let outcome = correlate(&records, items);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].is_transaction_related);
        assert_eq!(outcome.errors[0].external_id, "b");
    }

    #[test]
    fn test_prompt_embeds_ids() {
        let prompt = build_prompt(&[record("<m1@shop>", "Your receipt")]);
        assert!(prompt.contains("\"id\": \"<m1@shop>\""));
        assert!(prompt.contains("Your receipt"));
    }

    #[tokio::test]
    async fn test_missing_item_retried_individually() {
        let provider = Scripted::new(vec![
            Ok(r#"[{"id":"a","is_transaction_related":true,"confidence":0.9},
                  {"id":"b","is_transaction_related":false,"confidence":0.7}]"#
                .to_string()),
            Ok("```json\n{\"is_transaction_related\": true, \"confidence\": 0.6}\n```".to_string()),
        ]);
        let classifier = BatchClassifier::new(provider.clone(), DEFAULT_BATCH_TOKEN_BUDGET);
        let records = vec![record("a", "1"), record("b", "2"), record("c", "3")];

        let outcome = classifier.classify_batch(&records).await;
        assert_eq!(outcome.len(), 3);
        assert!(outcome.errors.is_empty());
        assert_eq!(provider.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_batch_and_failed_retries_are_errors() {
        let provider = Scripted::new(vec![
            Ok("Sorry, I can't do that".to_string()),
            Ok(r#"[{"is_transaction_related": false}]"#.to_string()),
            Err(ClassifierError::Api(500, "boom".to_string())),
        ]);
        let classifier = BatchClassifier::new(provider, DEFAULT_BATCH_TOKEN_BUDGET);
        let records = vec![record("a", "1"), record("b", "2")];

        let outcome = classifier.classify_batch(&records).await;
        assert_eq!(outcome.results.len() + outcome.errors.len(), records.len());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].record_external_id, "a");
        assert_eq!(outcome.errors[0].external_id, "b");
    }
}

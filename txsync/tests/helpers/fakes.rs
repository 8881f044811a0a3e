//! In-process stand-ins for source adapters and the classification provider

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use txsync::models::{RawRecord, SyncWatermark};
use txsync::services::adapters::window_start;
use txsync::services::{AdapterError, ClassificationProvider, ClassifierError, FetchOutcome, SourceAdapter};
use txsync_common::SourceKind;

/// Adapter serving a mutable in-memory record list
///
/// Honors the inclusive watermark window and reports the newest record
/// timestamp as its terminal watermark.
pub struct FakeAdapter {
    kind: SourceKind,
    owner_id: String,
    records: Mutex<Vec<RawRecord>>,
    failure: Mutex<Option<String>>,
    ignore_watermark: AtomicBool,
    fetch_calls: AtomicUsize,
    watermarks_seen: Mutex<Vec<Option<SyncWatermark>>>,
}

impl FakeAdapter {
    pub fn new(kind: SourceKind, records: Vec<RawRecord>) -> Self {
        Self {
            kind,
            owner_id: "tester".to_string(),
            records: Mutex::new(records),
            failure: Mutex::new(None),
            ignore_watermark: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            watermarks_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, record: RawRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// Make every following fetch fail with `message` (None restores)
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(str::to_string);
    }

    /// Serve every record regardless of the stored watermark
    pub fn ignore_watermark(&self) {
        self.ignore_watermark.store(true, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn watermarks_seen(&self) -> Vec<Option<SyncWatermark>> {
        self.watermarks_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lookback(&self) -> Duration {
        Duration::days(365)
    }

    async fn fetch_since(
        &self,
        watermark: Option<&SyncWatermark>,
    ) -> Result<FetchOutcome, AdapterError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.watermarks_seen.lock().unwrap().push(watermark.cloned());

        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(AdapterError::Network(message));
        }

        let window = if self.ignore_watermark.load(Ordering::SeqCst) {
            None
        } else {
            watermark
        };
        let since = window_start(window, self.lookback(), Utc::now());
        let records: Vec<RawRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();

        let newest: Option<DateTime<Utc>> = records.iter().map(|r| r.timestamp).max();
        Ok(FetchOutcome::Records {
            records,
            next_watermark: SyncWatermark {
                source: self.kind,
                owner_id: self.owner_id.clone(),
                last_sync_at: newest.or_else(|| watermark.and_then(|w| w.last_sync_at)),
                content_hash: None,
            },
        })
    }
}

/// Provider that answers from the prompt itself
///
/// Every record whose text mentions an order, receipt or payment is
/// transaction-related. Items are returned fenced and in reverse order so
/// correlation has to go by id.
pub struct EchoProvider {
    calls: AtomicUsize,
    delay: StdDuration,
    omit_ids: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self::with_delay(StdDuration::ZERO)
    }

    /// Each call sleeps `delay` first (keeps a run busy for lock and cancel tests)
    pub fn with_delay(delay: StdDuration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
            omit_ids: Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Never return an item for `id`
    pub fn omit(&self, id: &str) {
        self.omit_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationProvider for EchoProvider {
    fn provider_name(&self) -> &str {
        "echo"
    }

    fn model_version(&self) -> &str {
        "echo-1"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClassifierError::Api(503, "overloaded".to_string()));
        }

        let (_, records_json) = prompt
            .split_once("Records:\n")
            .ok_or_else(|| ClassifierError::Parse("prompt without records".to_string()))?;
        let records: Vec<serde_json::Value> = serde_json::from_str(records_json)
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        let omit = self.omit_ids.lock().unwrap().clone();
        let mut items: Vec<serde_json::Value> = records
            .iter()
            .filter_map(|record| {
                let id = record["id"].as_str()?;
                if omit.contains(id) {
                    return None;
                }
                let text = record["text"].as_str().unwrap_or_default().to_lowercase();
                let related = ["order", "receipt", "payment"]
                    .iter()
                    .any(|k| text.contains(k));
                Some(serde_json::json!({
                    "id": id,
                    "isTransactionRelated": related,
                    "confidence": if related { "92%" } else { "0.1" },
                    "extracted_fields": {},
                }))
            })
            .collect();
        items.reverse();

        Ok(format!(
            "Here are the results:\n```json\n{}\n```",
            serde_json::Value::Array(items)
        ))
    }
}

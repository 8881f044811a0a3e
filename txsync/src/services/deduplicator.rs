//! Record deduplication
//!
//! Assigns every fetched record a stable key and filters records that are
//! already stored.
//!
//! **Key derivation:**
//! - `<source>:<native id>` when the source supplies an identifier
//!   (Message-ID, message guid, vCard UID)
//! - `<source>:sha256:<hex>` over normalized content otherwise
//!
//! Keys are never derived from internal row ids, which are regenerated on
//! re-import.

use sha2::{Digest, Sha256};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use txsync_common::Result;

use crate::db::records::key_exists;
use crate::models::RawRecord;

/// Outcome of resolving one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub is_duplicate: bool,
    /// `<source>:<external_id>`
    pub canonical_key: String,
    /// Stable external id: native id or `sha256:<hex>`
    pub external_id: String,
}

/// Per-run deduplicator
///
/// Consults the store's key index and remembers keys already seen in this
/// run, so a record repeated within one fetch is stored once.
pub struct Deduplicator {
    db: Pool<Sqlite>,
    seen: HashSet<String>,
}

impl Deduplicator {
    /// Create new deduplicator
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self {
            db,
            seen: HashSet::new(),
        }
    }

    /// Resolve a record's key and whether it is already present
    pub async fn resolve(&mut self, record: &RawRecord) -> Result<Resolution> {
        let external_id = stable_external_id(record);
        let canonical_key = format!("{}:{}", record.source, external_id);

        let is_duplicate = if self.seen.contains(&canonical_key) {
            true
        } else {
            key_exists(&self.db, &canonical_key).await?
        };

        if is_duplicate {
            tracing::trace!(key = %canonical_key, "Duplicate record skipped");
        } else {
            self.seen.insert(canonical_key.clone());
        }

        Ok(Resolution {
            is_duplicate,
            canonical_key,
            external_id,
        })
    }
}

/// Native identifier when present, content hash otherwise
pub fn stable_external_id(record: &RawRecord) -> String {
    match record.external_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("sha256:{}", content_hash(record)),
    }
}

/// SHA-256 over normalized record content
///
/// Covers timestamp, sender, subject and body; whitespace runs in text are
/// collapsed so formatting-only differences hash identically.
pub fn content_hash(record: &RawRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.source.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(record.timestamp.timestamp_micros().to_be_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(record.sender.as_deref().unwrap_or("")).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(record.subject.as_deref().unwrap_or("")).as_bytes());
    hasher.update([0u8]);
    match (&record.plain_text, &record.binary_body) {
        (Some(text), _) if !text.trim().is_empty() => hasher.update(normalize(text).as_bytes()),
        (_, Some(body)) => hasher.update(body),
        _ => {}
    }
    format!("{:x}", hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Record and watermark types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use txsync_common::SourceKind;

/// Highest point up to which a source has been durably synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub source: SourceKind,
    pub owner_id: String,
    /// Newest record timestamp certified by the last commit
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Snapshot hash for content-addressable sources
    pub content_hash: Option<String>,
}

impl SyncWatermark {
    /// Empty watermark (first sync)
    pub fn initial(source: SourceKind, owner_id: impl Into<String>) -> Self {
        Self {
            source,
            owner_id: owner_id.into(),
            last_sync_at: None,
            content_hash: None,
        }
    }
}

/// Attachment metadata, linked to its message by the message's external id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub external_id: String,
    pub message_external_id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
}

/// Record as produced by a source adapter. Immutable once fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Identifier native to the source (Message-ID, message guid, vCard UID)
    pub external_id: Option<String>,
    pub source: SourceKind,
    pub plain_text: Option<String>,
    pub binary_body: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl RawRecord {
    /// Plain-text record with a native identifier
    pub fn text(
        source: SourceKind,
        external_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: Some(external_id.into()),
            source,
            plain_text: Some(text.into()),
            binary_body: None,
            timestamp,
            sender: None,
            subject: None,
            attachments: Vec::new(),
        }
    }

    /// True when the plain-text field carries something other than whitespace
    pub fn has_plain_text(&self) -> bool {
        self.plain_text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

/// How the text of an extracted record was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    #[serde(rename = "direct")]
    Direct,
    /// Typedstream archive
    #[serde(rename = "decoded-format-A")]
    DecodedFormatA,
    /// Binary property list
    #[serde(rename = "decoded-format-B")]
    DecodedFormatB,
    /// Body present but not decodable
    #[serde(rename = "fallback-placeholder")]
    FallbackPlaceholder,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Direct => "direct",
            ExtractionMethod::DecodedFormatA => "decoded-format-A",
            ExtractionMethod::DecodedFormatB => "decoded-format-B",
            ExtractionMethod::FallbackPlaceholder => "fallback-placeholder",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record with resolved identity and usable text
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    pub raw: RawRecord,
    /// Stable external id: native id, or `sha256:<hex>` content hash
    pub external_id: String,
    /// `<source>:<external_id>`
    pub dedup_key: String,
    pub text: String,
    pub extraction_method: ExtractionMethod,
}

impl ExtractedRecord {
    pub fn source(&self) -> SourceKind {
        self.raw.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.raw.timestamp
    }
}

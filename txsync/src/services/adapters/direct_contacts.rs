//! Direct contacts: a local vCard export
//!
//! Each card becomes one record keyed by its `UID`. The card's `REV` gives the
//! record timestamp; cards without one take the file's modification time.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::path::PathBuf;
use txsync_common::SourceKind;

use super::{window_start, AdapterError, FetchOutcome, SourceAdapter};
use crate::models::{RawRecord, SyncWatermark};

/// Contacts change rarely; look back two years on first sync
pub const DIRECT_CONTACTS_LOOKBACK_DAYS: i64 = 730;

/// One parsed vCard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
    pub uid: Option<String>,
    pub full_name: Option<String>,
    pub organization: Option<String>,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub note: Option<String>,
    pub revision: Option<DateTime<Utc>>,
}

impl VCard {
    /// Text handed to the classifier
    pub fn to_text(&self) -> String {
        let mut lines = vec![format!(
            "Contact: {}",
            self.full_name.as_deref().unwrap_or("(unnamed)")
        )];
        if let Some(org) = &self.organization {
            lines.push(format!("Organization: {}", org));
        }
        for phone in &self.phones {
            lines.push(format!("Phone: {}", phone));
        }
        for email in &self.emails {
            lines.push(format!("Email: {}", email));
        }
        if let Some(note) = &self.note {
            lines.push(format!("Note: {}", note));
        }
        lines.join("\n")
    }
}

/// Reads contacts from a vCard file
pub struct DirectContactsAdapter {
    path: PathBuf,
    owner_id: String,
}

impl DirectContactsAdapter {
    pub fn new(path: PathBuf, owner_id: impl Into<String>) -> Self {
        Self {
            path,
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for DirectContactsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DirectContacts
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lookback(&self) -> Duration {
        Duration::days(DIRECT_CONTACTS_LOOKBACK_DAYS)
    }

    async fn fetch_since(
        &self,
        watermark: Option<&SyncWatermark>,
    ) -> Result<FetchOutcome, AdapterError> {
        let now = Utc::now();
        let since = window_start(watermark, self.lookback(), now);

        let content = tokio::fs::read_to_string(&self.path).await?;
        let modified: DateTime<Utc> = tokio::fs::metadata(&self.path).await?.modified()?.into();

        let records: Vec<RawRecord> = parse_vcards(&content)
            .into_iter()
            .filter_map(|card| {
                let timestamp = card.revision.unwrap_or(modified);
                if timestamp < since {
                    return None;
                }
                let mut record = RawRecord::text(
                    SourceKind::DirectContacts,
                    card.uid.clone().unwrap_or_default(),
                    card.to_text(),
                    timestamp,
                );
                record.external_id = card.uid.clone();
                record.sender = card.full_name.clone();
                Some(record)
            })
            .collect();

        tracing::debug!(
            path = %self.path.display(),
            since = %since,
            count = records.len(),
            "Read vCard export"
        );

        Ok(FetchOutcome::Records {
            records,
            next_watermark: SyncWatermark {
                source: SourceKind::DirectContacts,
                owner_id: self.owner_id.clone(),
                last_sync_at: Some(now),
                content_hash: None,
            },
        })
    }
}

/// Parse every `BEGIN:VCARD` ... `END:VCARD` block
///
/// Folded lines (continuations starting with a space or tab) are unfolded
/// first. Unknown properties are ignored.
pub fn parse_vcards(content: &str) -> Vec<VCard> {
    let mut unfolded: Vec<String> = Vec::new();
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = unfolded.last_mut() {
                last.push_str(&line[1..]);
                continue;
            }
        }
        unfolded.push(line.to_string());
    }

    let mut cards = Vec::new();
    let mut current: Option<VCard> = None;

    for line in unfolded {
        let Some((head, value)) = line.split_once(':') else {
            continue;
        };
        let name = head.split(';').next().unwrap_or("").to_ascii_uppercase();
        // Grouped properties ("item1.EMAIL") carry the name after the dot
        let name = name.rsplit('.').next().unwrap_or("").to_string();
        let value = unescape(value.trim());

        match name.as_str() {
            "BEGIN" if value.eq_ignore_ascii_case("VCARD") => current = Some(VCard::default()),
            "END" if value.eq_ignore_ascii_case("VCARD") => {
                if let Some(card) = current.take() {
                    cards.push(card);
                }
            }
            _ => {
                let Some(card) = current.as_mut() else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }
                match name.as_str() {
                    "UID" => card.uid = Some(value),
                    "FN" => card.full_name = Some(value),
                    "ORG" => card.organization = Some(value.replace(';', ", ")),
                    "TEL" => card.phones.push(value),
                    "EMAIL" => card.emails.push(value),
                    "NOTE" => card.note = Some(value),
                    "REV" => card.revision = parse_revision(&value),
                    _ => {}
                }
            }
        }
    }

    cards
}

fn unescape(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .replace("\\N", "\n")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// `REV` as RFC 3339 or compact ISO 8601 (`20240102T030405Z`)
fn parse_revision(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

//! Message-body extraction
//!
//! Decodes binary-archived rich-text bodies into plain text when a record
//! has no plain-text field. Format is chosen by magic marker, never by
//! trial decoding:
//!
//! | Header                 | Format                     | Method              |
//! |------------------------|----------------------------|---------------------|
//! | `04 0B "streamtyped"`  | typedstream archive        | `decoded-format-A`  |
//! | `"bplist00"`           | binary property list       | `decoded-format-B`  |
//! | anything else          | -                          | `fallback-placeholder` |
//!
//! A body that cannot be decoded is never dropped: it yields a tagged
//! placeholder text.

use std::io::Cursor;
use thiserror::Error;

use crate::error::SyncError;
use crate::models::{ExtractedRecord, ExtractionMethod, RawRecord};
use crate::services::deduplicator::Resolution;

const TYPEDSTREAM_MAGIC: &[u8] = b"\x04\x0bstreamtyped";
const BPLIST_MAGIC: &[u8] = b"bplist00";
const NSSTRING_MARKER: &[u8] = b"NSString";

/// Bytes after the class marker searched for the string tag
const TYPEDSTREAM_TAG_WINDOW: usize = 16;

/// Payloads above this size are decoded on the blocking pool
pub const LARGE_PAYLOAD_BYTES: usize = 64 * 1024;

/// Text recovered from a body, with how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub method: ExtractionMethod,
}

/// Decoding failures (always downgraded to a placeholder by callers)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Unrecognized body format")]
    UnknownFormat,

    #[error("Class marker not found")]
    MissingMarker,

    #[error("Body truncated")]
    Truncated,

    #[error("Malformed body: {0}")]
    Malformed(&'static str),

    #[error("Body text is not valid UTF-8/UTF-16")]
    InvalidText,

    #[error("Property list error: {0}")]
    Plist(String),

    #[error("Body decoded to empty text")]
    Empty,

    #[error("Decode task failed: {0}")]
    TaskFailed(String),
}

/// Tagged placeholder for a present-but-unparseable body
pub fn placeholder(byte_len: usize) -> Extraction {
    Extraction {
        text: format!("[unparseable message body: {} bytes]", byte_len),
        method: ExtractionMethod::FallbackPlaceholder,
    }
}

/// Detect the body format and decode it
pub fn decode_body(body: &[u8]) -> Result<Extraction, ExtractionError> {
    if body.starts_with(TYPEDSTREAM_MAGIC) {
        decode_typedstream(body).map(|text| Extraction {
            text,
            method: ExtractionMethod::DecodedFormatA,
        })
    } else if body.starts_with(BPLIST_MAGIC) {
        decode_bplist(body).map(|text| Extraction {
            text,
            method: ExtractionMethod::DecodedFormatB,
        })
    } else {
        Err(ExtractionError::UnknownFormat)
    }
}

/// Extract text from a binary body
///
/// Pure and deterministic: identical bytes always give an identical result.
pub fn extract_text(body: &[u8]) -> Extraction {
    decode_body(body).unwrap_or_else(|_| placeholder(body.len()))
}

/// Async variant of [`extract_text`]; large payloads are decoded off the runtime threads
pub async fn extract_text_async(body: Vec<u8>) -> Extraction {
    let len = body.len();
    decode_body_async(body)
        .await
        .unwrap_or_else(|_| placeholder(len))
}

async fn decode_body_async(body: Vec<u8>) -> Result<Extraction, ExtractionError> {
    if body.len() <= LARGE_PAYLOAD_BYTES {
        return decode_body(&body);
    }

    tokio::task::spawn_blocking(move || decode_body(&body))
        .await
        .map_err(|e| ExtractionError::TaskFailed(e.to_string()))?
}

/// Turn a deduplicated raw record into an extracted record
///
/// Plain text is used directly when present. Otherwise the binary body is
/// decoded; a failure becomes a placeholder and is logged.
pub async fn extract_record(raw: RawRecord, resolution: &Resolution) -> ExtractedRecord {
    let extraction = if raw.has_plain_text() {
        Extraction {
            text: raw.plain_text.clone().unwrap_or_default(),
            method: ExtractionMethod::Direct,
        }
    } else {
        match raw.binary_body.as_ref().filter(|b| !b.is_empty()) {
            Some(body) => {
                let len = body.len();
                match decode_body_async(body.clone()).await {
                    Ok(extraction) => extraction,
                    Err(e) => {
                        let failure = SyncError::Extraction {
                            external_id: resolution.external_id.clone(),
                            message: e.to_string(),
                        };
                        tracing::warn!(
                            source = %raw.source,
                            bytes = len,
                            error = %failure,
                            "Extraction fallback, storing placeholder"
                        );
                        placeholder(len)
                    }
                }
            }
            None => Extraction {
                text: "[empty message body]".to_string(),
                method: ExtractionMethod::FallbackPlaceholder,
            },
        }
    };

    ExtractedRecord {
        raw,
        external_id: resolution.external_id.clone(),
        dedup_key: resolution.canonical_key.clone(),
        text: extraction.text,
        extraction_method: extraction.method,
    }
}

// ---------------------------------------------------------------------------
// Format A: typedstream
// ---------------------------------------------------------------------------

fn decode_typedstream(data: &[u8]) -> Result<String, ExtractionError> {
    let marker = find(data, NSSTRING_MARKER).ok_or(ExtractionError::MissingMarker)?;
    let mut pos = marker + NSSTRING_MARKER.len();

    let window_end = (pos + TYPEDSTREAM_TAG_WINDOW).min(data.len());
    let tag = data[pos..window_end]
        .iter()
        .position(|&b| b == b'+')
        .ok_or(ExtractionError::MissingMarker)?;
    pos += tag + 1;

    let (len, start) = read_typedstream_length(data, pos)?;
    let end = start.checked_add(len).ok_or(ExtractionError::Truncated)?;
    let bytes = data.get(start..end).ok_or(ExtractionError::Truncated)?;

    let text = std::str::from_utf8(bytes).map_err(|_| ExtractionError::InvalidText)?;
    if text.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(text.to_string())
}

/// Length prefix: one byte below 0x80, `0x81` + u16 LE, or `0x82` + u32 LE
fn read_typedstream_length(data: &[u8], pos: usize) -> Result<(usize, usize), ExtractionError> {
    let first = *data.get(pos).ok_or(ExtractionError::Truncated)?;
    match first {
        0x81 => {
            let b = data.get(pos + 1..pos + 3).ok_or(ExtractionError::Truncated)?;
            Ok((u16::from_le_bytes([b[0], b[1]]) as usize, pos + 3))
        }
        0x82 => {
            let b = data.get(pos + 1..pos + 5).ok_or(ExtractionError::Truncated)?;
            Ok((
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize,
                pos + 5,
            ))
        }
        n if n < 0x80 => Ok((n as usize, pos + 1)),
        _ => Err(ExtractionError::Malformed("unsupported typedstream length tag")),
    }
}

// ---------------------------------------------------------------------------
// Format B: binary property list
// ---------------------------------------------------------------------------

fn decode_bplist(data: &[u8]) -> Result<String, ExtractionError> {
    let root = plist::Value::from_reader(Cursor::new(data))
        .map_err(|e| ExtractionError::Plist(e.to_string()))?;

    // Keyed archives keep every string in `$objects`; plain lists are walked whole
    let objects = root
        .as_dictionary()
        .and_then(|dict| dict.get("$objects"))
        .unwrap_or(&root);

    let mut strings = Vec::new();
    collect_strings(objects, &mut strings);

    let mut best: Option<&str> = None;
    for candidate in strings {
        let candidate = candidate.trim();
        if candidate.is_empty() || is_class_name(candidate) {
            continue;
        }
        let longer = best
            .map(|b| candidate.chars().count() > b.chars().count())
            .unwrap_or(true);
        if longer {
            best = Some(candidate);
        }
    }

    best.map(str::to_string).ok_or(ExtractionError::Empty)
}

/// String values in document order (dictionary keys excluded)
fn collect_strings<'a>(value: &'a plist::Value, out: &mut Vec<&'a str>) {
    match value {
        plist::Value::String(s) => out.push(s),
        plist::Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        plist::Value::Dictionary(dict) => {
            for (_, item) in dict.iter() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

/// Archiver bookkeeping strings that are never message text
fn is_class_name(s: &str) -> bool {
    if s.starts_with('$') || s.starts_with("__kIM") {
        return true;
    }
    let mut chars = s.chars();
    s.starts_with("NS")
        && chars.nth(2).map(|c| c.is_ascii_uppercase()).unwrap_or(false)
        && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typedstream(text: &str) -> Vec<u8> {
        let mut data = TYPEDSTREAM_MAGIC.to_vec();
        data.extend_from_slice(b"\x81\xe8\x03\x84\x01@\x84\x84\x84\x12NSAttributedString\x00\x84\x84\x08NSObject\x00\x85\x92\x84\x84\x84\x08");
        data.extend_from_slice(NSSTRING_MARKER);
        data.extend_from_slice(b"\x01\x94\x84\x01+");
        let bytes = text.as_bytes();
        if bytes.len() < 0x80 {
            data.push(bytes.len() as u8);
        } else {
            data.push(0x81);
            data.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        }
        data.extend_from_slice(bytes);
        data.extend_from_slice(b"\x86\x84\x02iI\x01");
        data
    }

    /// Keyed archive the way the message store writes it
    fn keyed_archive(objects: Vec<plist::Value>) -> Vec<u8> {
        let mut top = plist::Dictionary::new();
        top.insert("root".to_string(), plist::Value::Uid(plist::Uid::new(1)));

        let mut archive = plist::Dictionary::new();
        archive.insert("$version".to_string(), plist::Value::Integer(100_000i64.into()));
        archive.insert(
            "$archiver".to_string(),
            plist::Value::String("NSKeyedArchiver".to_string()),
        );
        archive.insert("$top".to_string(), plist::Value::Dictionary(top));
        archive.insert("$objects".to_string(), plist::Value::Array(objects));

        let mut data = Vec::new();
        plist::Value::Dictionary(archive)
            .to_writer_binary(&mut data)
            .unwrap();
        data
    }

    fn text(s: &str) -> plist::Value {
        plist::Value::String(s.to_string())
    }

    #[test]
    fn test_typedstream_short_and_long_lengths() {
        let short = extract_text(&typedstream("Your order has shipped"));
        assert_eq!(short.text, "Your order has shipped");
        assert_eq!(short.method, ExtractionMethod::DecodedFormatA);

        let long_text = "Receipt line. ".repeat(20);
        let long = extract_text(&typedstream(&long_text));
        assert_eq!(long.text, long_text);
        assert_eq!(long.method, ExtractionMethod::DecodedFormatA);
    }

    #[test]
    fn test_bplist_picks_longest_message_string() {
        let mut class = plist::Dictionary::new();
        class.insert("$classname".to_string(), text("NSMutableAttributedString"));
        let body = keyed_archive(vec![
            text("$null"),
            text("NSMutableString"),
            plist::Value::Integer(7i64.into()),
            text("ok"),
            text("Payment of €25.00 received, thanks"),
            text("__kIMMessagePartAttributeName"),
            plist::Value::Dictionary(class),
        ]);
        assert!(body.starts_with(BPLIST_MAGIC));
        let extraction = extract_text(&body);
        assert_eq!(extraction.text, "Payment of €25.00 received, thanks");
        assert_eq!(extraction.method, ExtractionMethod::DecodedFormatB);
    }

    #[test]
    fn test_unknown_header_gives_placeholder() {
        let extraction = extract_text(b"\x00\x01garbage body");
        assert_eq!(extraction.method, ExtractionMethod::FallbackPlaceholder);
        assert_eq!(extraction.text, "[unparseable message body: 14 bytes]");
    }

    #[test]
    fn test_truncated_bodies_give_placeholder() {
        let mut body = typedstream("Invoice attached");
        body.truncate(body.len() - 12);
        assert_eq!(
            extract_text(&body).method,
            ExtractionMethod::FallbackPlaceholder
        );

        let mut body = keyed_archive(vec![text("Invoice attached")]);
        body.truncate(20);
        assert!(matches!(
            decode_body(&body).unwrap_err(),
            ExtractionError::Plist(_)
        ));
        assert_eq!(
            extract_text(&body).method,
            ExtractionMethod::FallbackPlaceholder
        );
    }

    #[test]
    fn test_bplist_with_only_class_names_is_empty() {
        let body = keyed_archive(vec![text("$null"), text("NSString")]);
        assert_eq!(decode_body(&body).unwrap_err(), ExtractionError::Empty);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let inputs = vec![
            typedstream("Ticket confirmed"),
            keyed_archive(vec![text("Booking ref ABC123")]),
            b"not an archive".to_vec(),
        ];
        for input in inputs {
            assert_eq!(extract_text(&input), extract_text(&input));
        }
    }

    #[tokio::test]
    async fn test_async_variant_matches_sync_for_large_payload() {
        let text = "x".repeat(LARGE_PAYLOAD_BYTES / 2);
        let mut body = typedstream("placeholder");
        let marker = find(&body, b"+").unwrap();
        body.truncate(marker + 1);
        body.push(0x82);
        body.extend_from_slice(&(text.len() as u32).to_le_bytes());
        body.extend_from_slice(text.as_bytes());
        body.extend_from_slice(&vec![0u8; LARGE_PAYLOAD_BYTES]);

        let sync = extract_text(&body);
        let async_result = extract_text_async(body).await;
        assert_eq!(sync, async_result);
        assert_eq!(async_result.method, ExtractionMethod::DecodedFormatA);
        assert_eq!(async_result.text.len(), text.len());
    }

    #[tokio::test]
    async fn test_record_with_binary_body_is_decoded() {
        use chrono::Utc;
        use txsync_common::SourceKind;

        let mut raw = RawRecord::text(SourceKind::DeviceBackup, "guid-9", "", Utc::now());
        raw.binary_body = Some(typedstream("Delivery scheduled for Friday"));
        let resolution = Resolution {
            is_duplicate: false,
            canonical_key: "device-backup:guid-9".to_string(),
            external_id: "guid-9".to_string(),
        };

        let record = extract_record(raw, &resolution).await;
        assert_eq!(record.text, "Delivery scheduled for Friday");
        assert_eq!(record.extraction_method, ExtractionMethod::DecodedFormatA);
        assert_eq!(record.dedup_key, "device-backup:guid-9");
    }
}

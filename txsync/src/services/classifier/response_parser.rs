//! Lenient parsing of classifier output
//!
//! Model output arrives as free text. Wrapper markers (code fences, prose
//! before or after) are stripped, the structured payload is located, and each
//! item is normalized into one canonical shape at this boundary so nothing
//! downstream branches on field naming.

use serde_json::{Map, Value};
use thiserror::Error;

/// One response item after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    /// Index in the response array, counting skipped items
    pub position: usize,
    /// Correlation id echoed by the model, when present
    pub id: Option<String>,
    pub is_transaction_related: bool,
    /// Clamped to 0.0 - 1.0
    pub confidence: f64,
    pub extracted_fields: Map<String, Value>,
}

/// Response could not be parsed at all
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("No JSON payload found in response")]
    NoPayload,

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Payload is not an array of results")]
    NotAnArray,
}

/// Keys under which wrapper objects carry the result array
const ARRAY_KEYS: [&str; 3] = ["results", "classifications", "items"];

/// Parse a classifier response into items
///
/// Items that are not objects or lack a transaction flag are skipped (their
/// records end up unmatched); the survivors keep their original array
/// position. Fenced and unfenced responses parse identically.
pub fn parse_response(text: &str) -> Result<Vec<ParsedItem>, ParseError> {
    let cleaned = strip_wrappers(text);
    let value = locate_payload(cleaned)?;

    let raw_items = match value {
        Value::Array(items) => items,
        Value::Object(object) => unwrap_object(object)?,
        _ => return Err(ParseError::NotAnArray),
    };

    Ok(raw_items
        .into_iter()
        .enumerate()
        .filter_map(|(position, item)| normalize_item(position, item))
        .collect())
}

/// Strip code fences and surrounding whitespace
pub fn strip_wrappers(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop the language tag line ("```json")
        cleaned = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches("json"),
        };
    }
    cleaned = cleaned.trim_end();
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

fn locate_payload(text: &str) -> Result<Value, ParseError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    // Prose around the payload: take the outermost array, then the outermost object
    let spans = [('[', ']'), ('{', '}')];
    let mut last_error = None;
    for (open, close) in spans {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                match serde_json::from_str::<Value>(&text[start..=end]) {
                    Ok(value) => return Ok(value),
                    Err(e) => last_error = Some(e.to_string()),
                }
            }
        }
    }

    match last_error {
        Some(e) => Err(ParseError::InvalidJson(e)),
        None => Err(ParseError::NoPayload),
    }
}

/// `{"results": [...]}` style wrappers, or a bare single item
fn unwrap_object(object: Map<String, Value>) -> Result<Vec<Value>, ParseError> {
    let wrapped_key = object
        .keys()
        .find(|k| ARRAY_KEYS.contains(&normalize_key(k).as_str()))
        .cloned();

    if let Some(key) = wrapped_key {
        return match object.get(&key) {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(ParseError::NotAnArray),
        };
    }

    if object
        .keys()
        .any(|k| is_transaction_key(&normalize_key(k)))
    {
        return Ok(vec![Value::Object(object)]);
    }

    Err(ParseError::NotAnArray)
}

/// Lowercase, separators removed: `isTransactionRelated`, `is_transaction_related`
/// and `Is-Transaction-Related` all become `istransactionrelated`
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_transaction_key(normalized: &str) -> bool {
    matches!(
        normalized,
        "istransactionrelated" | "transactionrelated" | "istransaction" | "related"
    )
}

fn normalize_item(position: usize, value: Value) -> Option<ParsedItem> {
    let Value::Object(object) = value else {
        tracing::debug!(position, "Skipping non-object classifier item");
        return None;
    };

    let mut id = None;
    let mut related = None;
    let mut confidence = None;
    let mut extracted_fields = Map::new();

    for (key, value) in object {
        let normalized = normalize_key(&key);
        match normalized.as_str() {
            "id" | "recordid" | "externalid" | "recordexternalid" => id = as_id(&value),
            k if is_transaction_key(k) => related = as_bool(&value),
            "confidence" | "score" => confidence = as_f64(&value),
            "extractedfields" | "fields" | "extracted" => {
                if let Value::Object(fields) = value {
                    extracted_fields = fields;
                }
            }
            _ => {}
        }
    }

    let Some(is_transaction_related) = related else {
        tracing::debug!(position, "Skipping classifier item without a transaction flag");
        return None;
    };

    Some(ParsedItem {
        position,
        id,
        is_transaction_related,
        confidence: confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        extracted_fields,
    })
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|v| {
            if s.trim().ends_with('%') {
                v / 100.0
            } else {
                v
            }
        }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_and_bare_parse_identically() {
        let bare = r#"[{"id":"a","is_transaction_related":true,"confidence":0.9}]"#;
        let fenced = format!("```json\n{}\n```", bare);
        assert_eq!(parse_response(bare).unwrap(), parse_response(&fenced).unwrap());
    }

    #[test]
    fn test_prose_around_array() {
        let text = "Here are the results:\n[{\"id\":\"a\",\"isTransactionRelated\":false}]\nHope that helps.";
        let items = parse_response(text).unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].is_transaction_related);
        assert_eq!(items[0].confidence, 0.0);
    }

    #[test]
    fn test_field_name_variants_normalize() {
        let text = r#"{"Results":[
            {"RecordId":"a","IsTransactionRelated":"yes","Confidence":"85%","ExtractedFields":{"amount":"12.00"}},
            {"record_id":7,"is-transaction-related":0,"score":3.5}
        ]}"#;
        let items = parse_response(text).unwrap();
        assert_eq!(items[0].id.as_deref(), Some("a"));
        assert!(items[0].is_transaction_related);
        assert!((items[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(items[0].extracted_fields["amount"], "12.00");

        assert_eq!(items[1].id.as_deref(), Some("7"));
        assert!(!items[1].is_transaction_related);
        assert_eq!(items[1].confidence, 1.0);
    }

    #[test]
    fn test_single_object_item() {
        let items = parse_response(r#"{"is_transaction_related": true, "confidence": 0.4}"#).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].id.is_none());
    }

    #[test]
    fn test_items_without_flag_are_skipped() {
        let items = parse_response(r#"[{"id":"a"},"junk",{"id":"b","related":true}]"#).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_deref(), Some("b"));
        assert_eq!(items[0].position, 2);
    }

    #[test]
    fn test_total_failures() {
        assert_eq!(parse_response("I cannot help with that."), Err(ParseError::NoPayload));
        assert!(matches!(
            parse_response("[{\"id\": oops}]"),
            Err(ParseError::InvalidJson(_))
        ));
        assert_eq!(parse_response("42"), Err(ParseError::NotAnArray));
    }
}

//! Per-source enable flags
//!
//! One explicit record instead of scattered boolean checks. Fail-open: a
//! source with no recorded preference is enabled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use txsync_common::SourceKind;

/// Per-source enable flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePreferences {
    /// Explicitly recorded choices only
    pub enabled: BTreeMap<SourceKind, bool>,
}

impl SourcePreferences {
    /// Settings-table key for a source
    pub fn settings_key(source: SourceKind) -> String {
        format!("source_enabled.{}", source.as_str())
    }

    /// Whether a source should sync (true unless explicitly disabled)
    pub fn is_enabled(&self, source: SourceKind) -> bool {
        self.enabled.get(&source).copied().unwrap_or(true)
    }

    pub fn set(&mut self, source: SourceKind, enabled: bool) {
        self.enabled.insert(source, enabled);
    }

    /// Effective value for every source kind
    pub fn effective(&self) -> BTreeMap<SourceKind, bool> {
        SourceKind::ALL
            .iter()
            .map(|kind| (*kind, self.is_enabled(*kind)))
            .collect()
    }
}

//! Sync run state machine, status snapshot and summaries
//!
//! IDLE → LOCK_ACQUIRING → BLOCKED (terminal for that call)
//! IDLE → LOCK_ACQUIRING → RUNNING(phase 1..N) → COMPLETING → IDLE

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use txsync_common::SourceKind;
use uuid::Uuid;

/// Sync run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    LockAcquiring,
    Blocked,
    Running,
    Completing,
}

/// Kind of operation holding the global sync lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    FullSync,
    ContactsSync,
    EmailSync,
    DeviceBackupSync,
}

impl OperationKind {
    /// Operation kind for a requested source set
    pub fn for_sources(sources: &BTreeSet<SourceKind>) -> Self {
        if sources.len() == 1 {
            if let Some(only) = sources.iter().next() {
                return match only {
                    SourceKind::EmailProvider => OperationKind::EmailSync,
                    SourceKind::DeviceBackup => OperationKind::DeviceBackupSync,
                    _ => OperationKind::ContactsSync,
                };
            }
        }
        if !sources.is_empty() && sources.iter().all(|s| s.is_contacts()) {
            return OperationKind::ContactsSync;
        }
        OperationKind::FullSync
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::FullSync => "full-sync",
            OperationKind::ContactsSync => "contacts-sync",
            OperationKind::EmailSync => "email-sync",
            OperationKind::DeviceBackupSync => "device-backup-sync",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a source phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseOutcome {
    Completed,
    /// Snapshot hash unchanged, nothing fetched
    SkippedUnchanged,
    Failed,
    /// Stopped by cancellation (or never started because of it)
    Cancelled,
    /// Requested but disabled in preferences
    Disabled,
}

/// Per-source counts for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: SourceKind,
    pub outcome: PhaseOutcome,
    pub imported: usize,
    pub duplicates: usize,
    /// Records stored with a classification failure placeholder, or lost to a failed commit
    pub failed: usize,
    pub error: Option<String>,
}

impl SourceSummary {
    pub fn new(source: SourceKind, outcome: PhaseOutcome) -> Self {
        Self {
            source,
            outcome,
            imported: 0,
            duplicates: 0,
            failed: 0,
            error: None,
        }
    }
}

/// Summary of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub sources: Vec<SourceSummary>,
}

impl SyncSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            ended_at: None,
            cancelled: false,
            sources: Vec::new(),
        }
    }

    pub fn source(&self, source: SourceKind) -> Option<&SourceSummary> {
        self.sources.iter().find(|s| s.source == source)
    }

    pub fn total_imported(&self) -> usize {
        self.sources.iter().map(|s| s.imported).sum()
    }
}

/// Status snapshot exposed to callers; reading it never touches the sync lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_running: bool,
    pub run_id: Option<Uuid>,
    pub current_phase: Option<SourceKind>,
    /// 0.0 - 100.0
    pub progress_percent: f64,
    /// Why the most recent start request was refused
    pub blocked_reason: Option<String>,
    pub last_summary: Option<SyncSummary>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            is_running: false,
            run_id: None,
            current_phase: None,
            progress_percent: 0.0,
            blocked_reason: None,
            last_summary: None,
        }
    }
}

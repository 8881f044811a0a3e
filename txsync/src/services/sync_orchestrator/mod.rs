//! Sync orchestrator
//!
//! Owns the global sync lock and runs the source phases of one sync run.
//!
//! # State Progression
//! IDLE → LOCK_ACQUIRING → BLOCKED (lock held; returned to this caller only)
//! IDLE → LOCK_ACQUIRING → RUNNING(phase 1..N) → COMPLETING → IDLE
//!
//! # Phase pipeline
//! fetch since watermark → deduplicate → extract bodies → pack batches →
//! classify → commit batch + watermark
//!
//! Phases run sequentially in [`SourceKind::ALL`] order inside one spawned
//! task; `start_sync` returns immediately. A failed phase is recorded in the
//! run summary and the next phase still runs. Cancellation is checked before
//! every phase and every batch, so the batch in flight always completes.

pub mod sync_lock;
pub mod throttle;

pub use sync_lock::{LockHolder, SyncLock, SyncLockGuard};
pub use throttle::{OperationThrottle, DEFAULT_COOLDOWN};

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use txsync_common::events::{EventBus, SyncEvent};
use txsync_common::SourceKind;
use uuid::Uuid;

use crate::db::records::{commit_batch, CommitBatch};
use crate::db::{settings, sync_runs, watermarks};
use crate::error::SyncError;
use crate::models::{
    OperationKind, PhaseOutcome, SourcePreferences, SourceSummary, SyncState, SyncStatus,
    SyncSummary, SyncWatermark,
};
use crate::services::adapters::{FetchOutcome, SourceAdapter};
use crate::services::body_extractor::extract_record;
use crate::services::classifier::BatchClassifier;
use crate::services::deduplicator::Deduplicator;

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started {
        run_id: Uuid,
        operation: OperationKind,
    },
    /// Lock held by another run; nothing was started
    Blocked { reason: String },
}

impl StartOutcome {
    pub fn state(&self) -> SyncState {
        match self {
            StartOutcome::Started { .. } => SyncState::Running,
            StartOutcome::Blocked { .. } => SyncState::Blocked,
        }
    }
}

/// Sync orchestrator (cheap to clone, clones share state)
#[derive(Clone)]
pub struct SyncOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    adapters: Arc<BTreeMap<SourceKind, Arc<dyn SourceAdapter>>>,
    classifier: Arc<BatchClassifier>,
    lock: SyncLock,
    status: Arc<RwLock<SyncStatus>>,
    cancel_token: Arc<Mutex<Option<CancellationToken>>>,
}

impl SyncOrchestrator {
    /// Create new orchestrator
    ///
    /// # Arguments
    /// * `db` - Shared store
    /// * `event_bus` - Progress events
    /// * `classifier` - Batch classifier used by every phase
    /// * `adapters` - Configured adapters; sources without one are reported as disabled
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        classifier: Arc<BatchClassifier>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();

        Self {
            db,
            event_bus,
            adapters: Arc::new(adapters),
            classifier,
            lock: SyncLock::new(),
            status: Arc::new(RwLock::new(SyncStatus::default())),
            cancel_token: Arc::new(Mutex::new(None)),
        }
    }

    /// Sources with a configured adapter
    pub fn configured_sources(&self) -> Vec<SourceKind> {
        self.adapters.keys().copied().collect()
    }

    /// Current lock holder, if a run is in progress
    pub fn lock_holder(&self) -> Option<LockHolder> {
        self.lock.holder()
    }

    /// Status snapshot; never touches the sync lock
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Start a sync run for `sources` (empty means all)
    ///
    /// Returns immediately. When another run holds the lock the request is
    /// refused with [`StartOutcome::Blocked`]; nothing is queued.
    pub async fn start_sync(&self, sources: BTreeSet<SourceKind>) -> StartOutcome {
        let sources: BTreeSet<SourceKind> = if sources.is_empty() {
            SourceKind::ALL.into_iter().collect()
        } else {
            sources
        };
        let operation = OperationKind::for_sources(&sources);
        let run_id = Uuid::new_v4();

        tracing::debug!(state = ?SyncState::LockAcquiring, operation = %operation, "Acquiring sync lock");

        let guard = match self.lock.try_acquire(operation, run_id) {
            Ok(guard) => guard,
            Err(holder) => {
                let failure = SyncError::LockContention(format!(
                    "{} (run {}, since {})",
                    holder.held_by,
                    holder.run_id,
                    holder.acquired_at.to_rfc3339()
                ));
                let reason = failure.to_string();
                tracing::info!(requested = %operation, reason = %reason, "Sync start blocked");

                self.status.write().await.blocked_reason = Some(reason.clone());
                self.event_bus.emit_lossy(SyncEvent::SyncBlocked {
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                return StartOutcome::Blocked { reason };
            }
        };

        let cancel = CancellationToken::new();
        *self.cancel_slot() = Some(cancel.clone());

        {
            let mut status = self.status.write().await;
            let last_summary = status.last_summary.take();
            *status = SyncStatus {
                state: SyncState::Running,
                is_running: true,
                run_id: Some(run_id),
                current_phase: None,
                progress_percent: 0.0,
                blocked_reason: None,
                last_summary,
            };
        }

        tracing::info!(run_id = %run_id, operation = %operation, sources = ?sources, "Sync started");
        self.event_bus.emit_lossy(SyncEvent::SyncStarted {
            run_id,
            sources: sources.iter().copied().collect(),
            timestamp: Utc::now(),
        });

        let runner = self.clone();
        let supervisor = self.clone();
        tokio::spawn(async move {
            let handle = tokio::spawn(async move {
                runner.run(run_id, sources, cancel, guard).await;
            });
            // The guard moved into the run task releases the lock on unwind;
            // status is reset here
            if let Err(e) = handle.await {
                tracing::error!(run_id = %run_id, error = %e, "Sync task aborted");
                supervisor.reset_after_abort().await;
            }
        });

        StartOutcome::Started { run_id, operation }
    }

    /// Request cooperative cancellation of the running sync
    ///
    /// Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.cancel_slot().as_ref() {
            Some(token) if !token.is_cancelled() => {
                tracing::info!("Sync cancellation requested");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Poll until no run is active or `timeout` elapses; true when idle
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.status.read().await.is_running && !self.lock.is_held() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn cancel_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(
        self,
        run_id: Uuid,
        sources: BTreeSet<SourceKind>,
        cancel: CancellationToken,
        guard: SyncLockGuard,
    ) {
        let started = std::time::Instant::now();
        let mut summary = SyncSummary::new(run_id);

        let preferences = match settings::load_source_preferences(&self.db).await {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load source preferences, all sources enabled");
                SourcePreferences::default()
            }
        };

        let phases: Vec<SourceKind> = SourceKind::ALL
            .into_iter()
            .filter(|s| sources.contains(s))
            .collect();
        let runnable: Vec<SourceKind> = phases
            .iter()
            .copied()
            .filter(|s| preferences.is_enabled(*s) && self.adapters.contains_key(s))
            .collect();
        let share = if runnable.is_empty() {
            100.0
        } else {
            100.0 / runnable.len() as f64
        };

        let mut completed_phases = 0usize;
        for source in phases {
            if !preferences.is_enabled(source) {
                tracing::info!(source = %source, "Source disabled in preferences, skipping");
                summary
                    .sources
                    .push(SourceSummary::new(source, PhaseOutcome::Disabled));
                continue;
            }
            let Some(adapter) = self.adapters.get(&source).cloned() else {
                tracing::info!(source = %source, "No adapter configured, skipping");
                let mut skipped = SourceSummary::new(source, PhaseOutcome::Disabled);
                skipped.error = Some("source not configured".to_string());
                summary.sources.push(skipped);
                continue;
            };
            if cancel.is_cancelled() {
                summary
                    .sources
                    .push(SourceSummary::new(source, PhaseOutcome::Cancelled));
                continue;
            }

            let base = completed_phases as f64 * share;
            self.set_progress(run_id, Some(source), base).await;
            self.event_bus.emit_lossy(SyncEvent::PhaseStarted {
                run_id,
                source,
                timestamp: Utc::now(),
            });
            tracing::info!(run_id = %run_id, source = %source, "Phase started");

            let phase = self
                .run_phase(run_id, adapter.as_ref(), &cancel, base, share)
                .await;

            tracing::info!(
                run_id = %run_id,
                source = %source,
                outcome = ?phase.outcome,
                imported = phase.imported,
                duplicates = phase.duplicates,
                failed = phase.failed,
                "Phase finished"
            );
            self.event_bus.emit_lossy(SyncEvent::PhaseCompleted {
                run_id,
                source,
                imported: phase.imported,
                duplicates: phase.duplicates,
                failed: phase.failed,
                error: phase.error.clone(),
                timestamp: Utc::now(),
            });

            summary.sources.push(phase);
            completed_phases += 1;
            self.set_progress(run_id, None, completed_phases as f64 * share)
                .await;
        }

        self.status.write().await.state = SyncState::Completing;

        summary.cancelled = cancel.is_cancelled();
        summary.ended_at = Some(Utc::now());
        if let Err(e) = sync_runs::save_run(&self.db, &summary).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to persist run summary");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            cancelled = summary.cancelled,
            imported = summary.total_imported(),
            duration_ms,
            "Sync completed"
        );
        self.event_bus.emit_lossy(SyncEvent::SyncCompleted {
            run_id,
            cancelled: summary.cancelled,
            duration_ms,
            timestamp: Utc::now(),
        });

        // Status goes idle before the lock is released so a new run's status
        // write cannot be overwritten by this one
        let mut status = self.status.write().await;
        *status = SyncStatus {
            last_summary: Some(summary),
            progress_percent: 100.0,
            ..SyncStatus::default()
        };
        *self.cancel_slot() = None;
        drop(guard);
        drop(status);
    }

    /// Reset status after an aborted run
    async fn reset_after_abort(&self) {
        let mut status = self.status.write().await;
        let last_summary = status.last_summary.take();
        *status = SyncStatus {
            last_summary,
            ..SyncStatus::default()
        };
        *self.cancel_slot() = None;
    }

    async fn set_progress(&self, run_id: Uuid, phase: Option<SourceKind>, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        let current_phase = {
            let mut status = self.status.write().await;
            if phase.is_some() {
                status.current_phase = phase;
            }
            status.progress_percent = percent;
            status.current_phase
        };
        self.event_bus.emit_lossy(SyncEvent::SyncProgress {
            run_id,
            current_phase,
            progress_percent: percent,
            timestamp: Utc::now(),
        });
    }

    /// Run one source phase; every failure is folded into the returned summary
    async fn run_phase(
        &self,
        run_id: Uuid,
        adapter: &dyn SourceAdapter,
        cancel: &CancellationToken,
        base_percent: f64,
        share: f64,
    ) -> SourceSummary {
        let source = adapter.kind();
        let mut summary = SourceSummary::new(source, PhaseOutcome::Completed);

        let owner_id = self.owner_for(source);
        let watermark = match watermarks::load_watermark(&self.db, source, &owner_id).await {
            Ok(w) => w,
            Err(e) => return failed(summary, e.to_string()),
        };

        let (mut records, next_watermark) = match adapter.fetch_since(watermark.as_ref()).await {
            Ok(FetchOutcome::Unchanged { content_hash }) => {
                tracing::info!(
                    run_id = %run_id,
                    source = %source,
                    content_hash = %content_hash,
                    "Snapshot unchanged, skipping phase"
                );
                self.event_bus.emit_lossy(SyncEvent::PhaseSkipped {
                    run_id,
                    source,
                    content_hash,
                    timestamp: Utc::now(),
                });
                summary.outcome = PhaseOutcome::SkippedUnchanged;
                return summary;
            }
            Ok(FetchOutcome::Records {
                records,
                next_watermark,
            }) => (records, next_watermark),
            Err(e) => {
                let failure = SyncError::AdapterFetch {
                    source_kind: source,
                    message: e.to_string(),
                };
                tracing::warn!(run_id = %run_id, error = %failure, "Phase fetch failed");
                return failed(summary, failure.to_string());
            }
        };

        records.sort_by_key(|r| r.timestamp);
        let fetched = records.len();

        // Deduplicate before extraction so stored records are never decoded again
        let mut deduplicator = Deduplicator::new(self.db.clone());
        let mut extracted = Vec::with_capacity(fetched);
        for raw in records {
            let resolution = match deduplicator.resolve(&raw).await {
                Ok(resolution) => resolution,
                Err(e) => return failed(summary, e.to_string()),
            };
            if resolution.is_duplicate {
                summary.duplicates += 1;
                continue;
            }
            extracted.push(extract_record(raw, &resolution).await);
        }

        tracing::debug!(
            source = %source,
            fetched,
            new = extracted.len(),
            duplicates = summary.duplicates,
            "Records deduplicated"
        );

        if extracted.is_empty() {
            // Nothing to commit, so last_sync_at stays where it is; a new
            // snapshot hash is still kept so the next run can skip the file
            let stored_hash = watermark.as_ref().and_then(|w| w.content_hash.as_deref());
            if let Some(hash) = next_watermark.content_hash.as_deref() {
                if stored_hash != Some(hash) {
                    if let Err(e) =
                        watermarks::record_content_hash(&self.db, source, &owner_id, hash).await
                    {
                        tracing::warn!(source = %source, error = %e, "Failed to store snapshot hash");
                    }
                }
            }
            return summary;
        }

        let batches = self.classifier.pack(extracted);
        let batch_count = batches.len();
        let identity = self.classifier.identity();

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    source = %source,
                    remaining_batches = batch_count - index,
                    "Phase cancelled between batches"
                );
                summary.outcome = PhaseOutcome::Cancelled;
                break;
            }

            let outcome = self.classifier.classify_batch(&batch.items).await;

            let watermark = if index + 1 == batch_count {
                next_watermark.clone()
            } else {
                SyncWatermark {
                    source,
                    owner_id: owner_id.clone(),
                    last_sync_at: batch.items.iter().map(|r| r.timestamp()).max(),
                    content_hash: None,
                }
            };

            let commit = CommitBatch {
                source,
                records: &batch.items,
                outcome: &outcome,
                classifier: &identity,
                watermark: &watermark,
            };
            match commit_batch(&self.db, commit).await {
                Ok(stats) => {
                    summary.imported += stats.inserted - stats.classification_failed;
                    summary.failed += stats.classification_failed;
                    summary.duplicates += stats.already_present;
                }
                Err(e) => {
                    let failure = SyncError::Persistence {
                        source_kind: source,
                        message: e.to_string(),
                    };
                    tracing::error!(
                        run_id = %run_id,
                        batch_id = %batch.id,
                        error = %failure,
                        "Batch commit failed, watermark not advanced"
                    );
                    summary.failed += batch.items.len();
                    return failed(summary, failure.to_string());
                }
            }

            let done = (index + 1) as f64 / batch_count as f64;
            self.set_progress(run_id, Some(source), base_percent + done * share)
                .await;
        }

        summary
    }

    fn owner_for(&self, source: SourceKind) -> String {
        self.adapters
            .get(&source)
            .map(|a| a.owner_id().to_string())
            .unwrap_or_default()
    }
}

fn failed(mut summary: SourceSummary, error: String) -> SourceSummary {
    summary.outcome = PhaseOutcome::Failed;
    summary.error = Some(error);
    summary
}

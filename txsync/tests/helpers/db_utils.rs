//! Database and orchestrator test utilities

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use txsync::models::SyncSummary;
use txsync::services::{
    BatchClassifier, ClassificationProvider, SourceAdapter, StartOutcome, SyncOrchestrator,
};
use txsync_common::events::EventBus;
use txsync_common::SourceKind;

/// Create temporary test database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_txsync.db");
    let pool = txsync_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Orchestrator over `pool` with the given adapters and provider
pub fn create_test_orchestrator(
    pool: &SqlitePool,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    provider: Arc<dyn ClassificationProvider>,
    token_budget: usize,
) -> (SyncOrchestrator, EventBus) {
    let event_bus = EventBus::new(1000);
    let classifier = Arc::new(BatchClassifier::new(provider, token_budget));
    let orchestrator = SyncOrchestrator::new(pool.clone(), event_bus.clone(), classifier, adapters);
    (orchestrator, event_bus)
}

/// Start a run for `sources`, wait for it to finish and return its summary
pub async fn run_to_completion(
    orchestrator: &SyncOrchestrator,
    sources: &[SourceKind],
) -> SyncSummary {
    let requested: BTreeSet<SourceKind> = sources.iter().copied().collect();
    let outcome = orchestrator.start_sync(requested).await;
    let run_id = match outcome {
        StartOutcome::Started { run_id, .. } => run_id,
        StartOutcome::Blocked { reason } => panic!("sync unexpectedly blocked: {}", reason),
    };

    assert!(
        orchestrator.wait_idle(Duration::from_secs(30)).await,
        "sync did not finish in time"
    );

    let summary = orchestrator
        .status()
        .await
        .last_summary
        .expect("finished run leaves a summary");
    assert_eq!(summary.run_id, run_id);
    summary
}

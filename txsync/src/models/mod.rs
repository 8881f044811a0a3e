//! Data models for txsync
//!
//! - Records as they move through fetch → dedup → extraction → classification
//! - Sync run status, per-source summaries and the run state machine
//! - Feedback entries and accuracy statistics
//! - Per-source enable preferences

pub mod classification;
pub mod feedback;
pub mod preferences;
pub mod records;
pub mod sync_status;

pub use classification::{
    Batch, BatchOutcome, ClassificationResult, ClassifierIdentity, RecordError,
};
pub use feedback::{AccuracyStats, FeedbackAction, FeedbackEntry, SystematicError};
pub use preferences::SourcePreferences;
pub use records::{AttachmentRef, ExtractedRecord, ExtractionMethod, RawRecord, SyncWatermark};
pub use sync_status::{
    OperationKind, PhaseOutcome, SourceSummary, SyncState, SyncStatus, SyncSummary,
};

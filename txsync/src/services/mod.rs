//! Services for txsync
//!
//! - Source adapters (contacts, mailbox, device backup)
//! - Message-body extraction
//! - Deduplication and stable identity
//! - Batch classification
//! - Feedback and accuracy tracking
//! - Sync orchestration

pub mod adapters;
pub mod body_extractor;
pub mod classifier;
pub mod deduplicator;
pub mod feedback_tracker;
pub mod sync_orchestrator;

pub use adapters::{
    AdapterError, CredentialProvider, FetchOutcome, SourceAdapter, StaticCredentialProvider,
};
pub use classifier::{BatchClassifier, ChatCompletionsProvider, ClassificationProvider, ClassifierError};
pub use deduplicator::{Deduplicator, Resolution};
pub use feedback_tracker::FeedbackTracker;
pub use sync_orchestrator::{OperationThrottle, StartOutcome, SyncLock, SyncOrchestrator};

//! Source adapters
//!
//! One adapter per source kind. Each produces the records newer than a stored
//! watermark plus the terminal watermark to commit once those records are
//! stored. Adapters never write the watermark themselves.
//!
//! **First sync:** with no stored watermark the fetch is bounded by the
//! adapter's lookback window, never unbounded.

pub mod device_backup;
pub mod direct_contacts;
pub mod email_provider;
pub mod federated_contacts;

pub use device_backup::DeviceBackupAdapter;
pub use direct_contacts::DirectContactsAdapter;
pub use email_provider::EmailProviderAdapter;
pub use federated_contacts::FederatedContactsAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use txsync_common::SourceKind;

use crate::models::{RawRecord, SyncWatermark};

/// Adapter errors (scoped to one source phase)
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Credentials unavailable for {source_kind}: {message}")]
    Credentials {
        source_kind: SourceKind,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot database error: {0}")]
    Snapshot(#[from] sqlx::Error),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Network(err.to_string())
    }
}

/// Result of one fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Content-addressable snapshot matches the stored hash; nothing to do
    Unchanged { content_hash: String },
    /// Records to ingest, plus the watermark to commit after they are stored
    Records {
        records: Vec<RawRecord>,
        next_watermark: SyncWatermark,
    },
}

/// Produces records newer than a watermark
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source this adapter reads
    fn kind(&self) -> SourceKind;

    /// Account whose data this adapter reads (watermark key)
    fn owner_id(&self) -> &str;

    /// Fetch window used when no watermark is stored
    fn lookback(&self) -> Duration;

    /// Fetch records at or after the watermark
    ///
    /// The window is inclusive so records sharing the watermark timestamp are
    /// re-read; the deduplicator filters the ones already stored.
    async fn fetch_since(
        &self,
        watermark: Option<&SyncWatermark>,
    ) -> Result<FetchOutcome, AdapterError>;
}

/// Lower bound of a fetch: stored watermark, or `now - lookback` on first sync
pub fn window_start(
    watermark: Option<&SyncWatermark>,
    lookback: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    watermark
        .and_then(|w| w.last_sync_at)
        .unwrap_or(now - lookback)
}

/// Supplies per-source access credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self, source: SourceKind) -> Result<String, AdapterError>;
}

/// Credentials from environment variables or the TOML `[credentials]` table
///
/// `TXSYNC_<SOURCE>_TOKEN` (e.g. `TXSYNC_EMAIL_PROVIDER_TOKEN`) overrides the
/// TOML entry keyed by the source kind string.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    tokens: HashMap<SourceKind, String>,
}

impl StaticCredentialProvider {
    pub fn new(tokens: HashMap<SourceKind, String>) -> Self {
        Self { tokens }
    }

    /// Build from environment, falling back to configured tokens
    pub fn from_config(configured: &HashMap<String, String>) -> Self {
        let mut tokens = HashMap::new();
        for source in SourceKind::ALL {
            let from_env = std::env::var(Self::env_var(source))
                .ok()
                .filter(|t| !t.trim().is_empty());
            let token = from_env.or_else(|| configured.get(source.as_str()).cloned());
            if let Some(token) = token {
                tokens.insert(source, token);
            }
        }
        Self { tokens }
    }

    /// Environment variable name for a source's token
    pub fn env_var(source: SourceKind) -> String {
        format!(
            "TXSYNC_{}_TOKEN",
            source.as_str().replace('-', "_").to_uppercase()
        )
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn access_token(&self, source: SourceKind) -> Result<String, AdapterError> {
        self.tokens
            .get(&source)
            .cloned()
            .ok_or_else(|| AdapterError::Credentials {
                source_kind: source,
                message: format!("no token configured (set {})", Self::env_var(source)),
            })
    }
}

//! Configuration resolution for txsync
//!
//! Provides multi-tier configuration resolution with Database → ENV → TOML priority
//! for the classifier API key, and the TOML-backed sync settings.

use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use txsync_common::config::TomlConfig;
use txsync_common::{Error, Result, SourceKind};

use crate::services::adapters::{
    CredentialProvider, DeviceBackupAdapter, DirectContactsAdapter, EmailProviderAdapter,
    FederatedContactsAdapter, SourceAdapter,
};
use crate::services::classifier::provider::DEFAULT_REQUESTS_PER_MINUTE;
use crate::services::classifier::DEFAULT_BATCH_TOKEN_BUDGET;
use crate::services::sync_orchestrator::DEFAULT_COOLDOWN;

/// Environment variable holding the classifier API key
pub const LLM_API_KEY_ENV: &str = "TXSYNC_LLM_API_KEY";

pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";
pub const DEFAULT_OWNER_ID: &str = "default";

/// Resolve classifier API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_llm_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_key = crate::db::settings::get_llm_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(LLM_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .llm
        .api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Classifier API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Classifier API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Classifier API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Classifier API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Classifier API key not configured. Set one of:\n\
         1. Environment: {}=your-key\n\
         2. TOML config: [llm] api_key = \"your-key\"",
        LLM_API_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Sync settings resolved from TOML with compiled defaults
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub owner_id: String,
    pub batch_token_budget: usize,
    pub cooldown: Duration,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub requests_per_minute: u32,
    pub vcard_path: Option<PathBuf>,
    pub contacts_url: Option<String>,
    pub mailbox_url: Option<String>,
    pub backup_snapshot_path: Option<PathBuf>,
}

impl SyncSettings {
    pub fn from_toml(config: &TomlConfig) -> Self {
        Self {
            owner_id: config
                .sources
                .owner_id
                .clone()
                .unwrap_or_else(|| DEFAULT_OWNER_ID.to_string()),
            batch_token_budget: config
                .sync
                .batch_token_budget
                .filter(|b| *b > 0)
                .unwrap_or(DEFAULT_BATCH_TOKEN_BUDGET),
            cooldown: config
                .sync
                .cooldown_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COOLDOWN),
            llm_endpoint: config
                .llm
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            llm_model: config
                .llm
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            requests_per_minute: config
                .llm
                .requests_per_minute
                .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
            vcard_path: config.sources.vcard_path.clone(),
            contacts_url: config.sources.contacts_url.clone(),
            mailbox_url: config.sources.mailbox_url.clone(),
            backup_snapshot_path: config.sources.backup_snapshot_path.clone(),
        }
    }

    /// Build one adapter per configured source location
    ///
    /// Sources without a location are left out; the orchestrator reports
    /// them as not configured.
    pub fn build_adapters(
        &self,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Vec<Arc<dyn SourceAdapter>> {
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

        if let Some(path) = &self.vcard_path {
            adapters.push(Arc::new(DirectContactsAdapter::new(
                path.clone(),
                self.owner_id.clone(),
            )));
        }

        if let Some(url) = &self.contacts_url {
            match FederatedContactsAdapter::new(url.clone(), self.owner_id.clone(), credentials.clone()) {
                Ok(adapter) => adapters.push(Arc::new(adapter)),
                Err(e) => warn!(source = %SourceKind::FederatedContacts, error = %e, "Adapter not created"),
            }
        }

        if let Some(url) = &self.mailbox_url {
            match EmailProviderAdapter::new(url.clone(), self.owner_id.clone(), credentials.clone()) {
                Ok(adapter) => adapters.push(Arc::new(adapter)),
                Err(e) => warn!(source = %SourceKind::EmailProvider, error = %e, "Adapter not created"),
            }
        }

        if let Some(path) = &self.backup_snapshot_path {
            adapters.push(Arc::new(DeviceBackupAdapter::new(
                path.clone(),
                self.owner_id.clone(),
            )));
        }

        adapters
    }
}

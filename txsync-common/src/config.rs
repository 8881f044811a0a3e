//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "txsync.db";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TXSYNC_ROOT_FOLDER";

/// TOML configuration file contents
///
/// Every section is optional; absent sections fall back to compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the database
    pub root_folder: Option<PathBuf>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// HTTP bind address (e.g. "127.0.0.1:5740")
    pub bind_address: Option<String>,
    /// Classification provider settings
    pub llm: LlmConfig,
    /// Per-source access tokens, keyed by source kind string
    pub credentials: HashMap<String, String>,
    /// Source locations
    pub sources: SourcesConfig,
    /// Sync tuning
    pub sync: SyncTuning,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Classification provider settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat-completions endpoint URL
    pub endpoint: Option<String>,
    /// Model identifier sent with each request
    pub model: Option<String>,
    /// API key (lowest priority tier)
    pub api_key: Option<String>,
    /// Maximum provider requests per minute
    pub requests_per_minute: Option<u32>,
}

/// Where each source reads from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Owner identifier stamped on every watermark
    pub owner_id: Option<String>,
    /// Local vCard export
    pub vcard_path: Option<PathBuf>,
    /// Remote contacts endpoint
    pub contacts_url: Option<String>,
    /// Remote mailbox endpoint
    pub mailbox_url: Option<String>,
    /// Device backup message-store snapshot
    pub backup_snapshot_path: Option<PathBuf>,
}

/// Sync tuning knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Token ceiling per classification batch
    pub batch_token_budget: Option<usize>,
    /// Cooldown between externally triggered runs (seconds)
    pub cooldown_seconds: Option<u64>,
}

/// Root folder resolution, priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("txsync").join("txsync.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("txsync"))
        .unwrap_or_else(|| PathBuf::from("./txsync_data"))
}

/// Load TOML configuration
///
/// A missing file is not an error: defaults are returned.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

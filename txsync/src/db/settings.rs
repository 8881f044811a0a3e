//! Settings database operations
//!
//! Key-value accessors over the `settings` table: source preferences,
//! the classifier API key and tuning values.

use sqlx::{Pool, Sqlite};
use txsync_common::{Error, Result, SourceKind};

use crate::models::SourcePreferences;

const LLM_API_KEY: &str = "llm_api_key";

/// Get classifier API key from database
pub async fn get_llm_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, LLM_API_KEY).await
}

/// Set classifier API key in database
pub async fn set_llm_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, LLM_API_KEY, key).await
}

/// Load per-source enable flags
///
/// Only explicitly stored choices are returned; missing entries stay
/// absent so the fail-open default applies.
pub async fn load_source_preferences(db: &Pool<Sqlite>) -> Result<SourcePreferences> {
    let mut prefs = SourcePreferences::default();
    for source in SourceKind::ALL {
        let key = SourcePreferences::settings_key(source);
        if let Some(enabled) = get_setting::<bool>(db, &key).await? {
            prefs.set(source, enabled);
        }
    }
    Ok(prefs)
}

/// Persist one source's enable flag
pub async fn set_source_enabled(db: &Pool<Sqlite>, source: SourceKind, enabled: bool) -> Result<()> {
    let key = SourcePreferences::settings_key(source);
    set_setting(db, &key, enabled).await?;
    tracing::info!(source = %source, enabled, "Source preference updated");
    Ok(())
}

/// Generic setting getter (internal)
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (internal)
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

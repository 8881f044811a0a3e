//! txsync - transaction-signal sync service
//!
//! Pulls records from contacts, mailbox and device-backup sources, classifies
//! them in token-bounded batches and stores them in the local SQLite store.
//! Sync runs are controlled over HTTP REST; progress streams over SSE.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use txsync_common::events::EventBus;

use txsync::config::{resolve_llm_api_key, SyncSettings, DEFAULT_BIND_ADDRESS};
use txsync::services::{
    BatchClassifier, ChatCompletionsProvider, StaticCredentialProvider, SyncOrchestrator,
};
use txsync::AppState;

/// Command-line arguments for txsync
#[derive(Parser, Debug)]
#[command(name = "txsync")]
#[command(about = "Transaction-signal sync service")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "TXSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long, env = "TXSYNC_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing starts so its log level can apply
    let config_path = match args.config.clone() {
        Some(path) => path,
        None => txsync_common::config::default_config_path()?,
    };
    let toml_config = txsync_common::config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting txsync");
    info!(
        "Version: {} ({}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Config: {}", config_path.display());

    let root_folder =
        txsync_common::config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = txsync_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = txsync::db::init_database_pool(&db_path).await?;

    let settings = SyncSettings::from_toml(&toml_config);
    let api_key = resolve_llm_api_key(&db_pool, &toml_config).await?;
    let provider = ChatCompletionsProvider::new(
        settings.llm_endpoint.clone(),
        settings.llm_model.clone(),
        api_key,
        settings.requests_per_minute,
    )
    .context("Failed to create classification provider")?;
    let classifier = Arc::new(BatchClassifier::new(
        Arc::new(provider),
        settings.batch_token_budget,
    ));
    let identity = classifier.identity();
    info!(
        provider = %identity.provider,
        model = %identity.model_version,
        prompt_version = %identity.prompt_version,
        "Classifier ready"
    );

    let credentials = Arc::new(StaticCredentialProvider::from_config(
        &toml_config.credentials,
    ));
    let adapters = settings.build_adapters(credentials);
    if adapters.is_empty() {
        warn!("No sources configured; sync runs will report every source as not configured");
    }

    let event_bus = EventBus::new(100);
    let orchestrator = SyncOrchestrator::new(db_pool.clone(), event_bus.clone(), classifier, adapters);
    info!(sources = ?orchestrator.configured_sources(), "Sync orchestrator initialized");

    let state = AppState::new(
        db_pool,
        event_bus,
        orchestrator.clone(),
        identity,
        settings.cooldown,
    );
    let app = txsync::build_router(state);

    let bind = args
        .bind
        .or(toml_config.bind_address.clone())
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if orchestrator.cancel() {
        info!("Waiting for the running sync to finish its current batch");
        if !orchestrator.wait_idle(Duration::from_secs(60)).await {
            warn!("Sync still running at shutdown");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

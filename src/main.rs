use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_file_archiver::config::Config;
use forum_file_archiver::db::Database;
use forum_file_archiver::scraper::{Credentials, ForumSession, LogLevelHandle, Scraper};
use forum_file_archiver::storage::StoragePool;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    let log_handle = init_tracing()?;

    info!("Starting forum-file-archiver");

    // Load and validate configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(forum = %config.forum_base_url, "Configuration loaded");

    // Ensure data directories exist
    for path in [
        &config.database_path,
        &config.quota_cache_path,
        &config.scraper_config_path,
        &config.status_path,
        &config.critical_log_path,
        &config.unhandled_url_log_path,
    ] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    // Initialize database
    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    // Initialize the storage pool and warm the quota cache
    let storage = StoragePool::from_credentials_dir(
        &config.storage_credentials_dir,
        config.quota_cache_path.clone(),
        config.usage_cutoff,
    )
    .context("Failed to initialize storage pool")?;
    storage
        .ensure_cache()
        .await
        .context("Failed to populate quota cache")?;
    info!("Storage pool ready:\n{}", storage.breakdown()?);

    // Forum login is fatal on failure: bad credentials are not retried.
    let credentials = Credentials::from_file(&config.forum_credentials_file)?;
    let session = ForumSession::login(&config.forum_base_url, &credentials)
        .await
        .context("Failed to log in to the forum")?;

    let scraper = Scraper::new(session, db, storage, &config)?.with_log_handle(log_handle);
    let scrape_handle = tokio::spawn(async move {
        if let Err(e) = scraper.run().await {
            error!("Scraper stopped: {e:#}");
        }
    });
    info!("Scraper started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");

    scrape_handle.abort();

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<LogLevelHandle> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_file_archiver=debug"));

    // The scraper re-applies the configured log level every cycle through
    // this reload handle.
    let (filter, handle) = tracing_subscriber::reload::Layer::new(filter);

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        // Pretty-printed logging for development
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(handle)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

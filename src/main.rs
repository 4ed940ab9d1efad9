use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod convert;
mod decode;
#[cfg(feature = "camera-raw")]
mod raw;
mod server;
mod state;
mod upscale;

use config::{Args, Config};
use server::AppState;
use state::sweeper::{self, SweepPolicy};
use state::{Catalog, ContentStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from(Args::parse());

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config
        .prepare()
        .context("Failed to create working directories")?;
    let config = Arc::new(config);

    let catalog = Catalog::open(&config.catalog_path)
        .with_context(|| format!("Failed to open catalog at {}", config.catalog_path.display()))?;
    let store = Arc::new(
        ContentStore::open(&config.upload_dir, catalog)
            .with_context(|| format!("Failed to open store at {}", config.upload_dir.display()))?,
    );

    let status = upscale::tool::check_status(&config);
    if status.available {
        info!(tool = %config.tool_path.display(), "external upscaler ready");
    } else {
        warn!(
            tool = %config.tool_path.display(),
            models = %config.models_dir.display(),
            "{}; upscales will use the fallback pipeline",
            status.message
        );
    }

    let shutdown = CancellationToken::new();
    let sweeper = sweeper::spawn(
        Arc::clone(&store),
        SweepPolicy {
            interval: config.sweep_interval,
            max_age: config.retention,
        },
        shutdown.clone(),
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!(
        addr = %listener.local_addr()?,
        store = %store.root().display(),
        catalog = ?store.catalog().path(),
        catalog_entries = store.catalog().len().unwrap_or(0),
        max_upload_mb = config.max_upload_mb(),
        "pixel-forge listening"
    );

    let state = Arc::new(AppState::new(Arc::clone(&config), Arc::clone(&store)));
    let server = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    shutdown.cancel();

    if let Err(e) = server.await {
        warn!(error = %e, "server task ended abnormally");
    }
    if let Err(e) = sweeper.await {
        warn!(error = %e, "sweeper task ended abnormally");
    }

    Ok(())
}

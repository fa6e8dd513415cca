//! Content Sync
//!
//! Mirrors each StaticSite's Git repository onto the shared content volume
//! and serves the push webhook and per-site manual sync API.
//!
//! A full pass runs every `SYNC_INTERVAL`; webhooks and manual calls sync
//! single sites in between. Content whose record is gone is removed at the
//! end of every full pass.

mod config;
mod engine;
mod error;
mod git;
mod layout;
mod locks;
mod metrics;
mod scheduler;
mod server;
mod validate;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::engine::{SyncEngine, SyncSettings};
use crate::error::SyncError;
use crate::git::GitFetcher;
use crate::layout::ContentLayout;
use crate::metrics::SyncMetrics;
use crate::server::AppState;
use cluster_client::ResourceRegistry;
use kube::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting content sync v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    config.log();

    let layout = ContentLayout::new(config.content_root.clone());
    tokio::fs::create_dir_all(layout.root()).await?;

    let client = Client::try_default().await?;
    let store = ResourceRegistry::default().site_store(client, config.api_timeout);

    let engine = Arc::new(SyncEngine::new(
        Arc::new(store),
        Arc::new(GitFetcher::shallow()),
        layout,
        config.allowed_hosts.clone(),
        SyncSettings {
            git_timeout: config.git_timeout,
            default_username: config.default_username.clone(),
        },
        SyncMetrics::new()?,
    ));

    let shutdown = CancellationToken::new();
    let mut periodic = tokio::spawn(scheduler::run_periodic(
        Arc::clone(&engine),
        config.sync_interval,
        shutdown.clone(),
    ));

    let listener = TcpListener::bind(config.listen_addr).await?;
    let state = AppState {
        engine,
        webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
        shutdown: shutdown.clone(),
    };
    let mut http = tokio::spawn(server::serve(listener, state, shutdown.clone(), config.shutdown_grace));

    tokio::select! {
        result = &mut http => {
            shutdown.cancel();
            result??;
            return Err(SyncError::Task("HTTP server exited".to_string()));
        }
        result = &mut periodic => {
            shutdown.cancel();
            result?;
            return Err(SyncError::Task("Periodic sync exited".to_string()));
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    }

    // The pass in flight finishes its current site before stopping.
    if let Err(e) = periodic.await {
        error!("Periodic sync panicked: {}", e);
    }
    http.await??;

    info!("Content sync stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

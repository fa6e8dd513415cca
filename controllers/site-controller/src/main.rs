//! Site Controller
//!
//! Reconciles StaticSite records into the resources that serve them:
//! - Middleware: rewrites request paths onto the site's content directory
//! - IngressRoute: routes the site's host (and optional path prefix)
//! - Certificate: one per custom domain, shared between sites on that domain
//!
//! The controller also mints the per-site token used by the content sync
//! front end.

mod config;
mod controller;
mod error;
mod metrics;
mod probes;
mod reconcile_helpers;
mod reconciler;
mod token;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting site controller v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

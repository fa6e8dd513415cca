//! Webhook and manual-trigger HTTP front end

pub mod auth;
pub mod routes;
pub mod webhook;

use crate::engine::SyncEngine;
use crate::error::SyncError;
use axum::Router;
use axum::routing::{delete, get, post};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// State shared by the handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Sync engine
    pub engine: Arc<SyncEngine>,
    /// Webhook signature secret; signatures are not checked when `None`
    pub webhook_secret: Option<Arc<str>>,
    /// Cancels background webhook dispatches on shutdown
    pub shutdown: CancellationToken,
}

/// Builds the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics_text))
        .route("/webhook/{provider}", post(routes::webhook))
        .route("/sync/{namespace}/{name}", post(routes::manual_sync))
        .route("/site/{namespace}/{name}", delete(routes::delete_site))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` is cancelled, then gives in-flight requests
/// `grace` to finish
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<(), SyncError> {
    info!("HTTP server listening on {}", listener.local_addr()?);
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => return Ok(result?),
        () = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result?,
        Err(_) => warn!(
            "HTTP server did not drain within {}, dropping open connections",
            humantime::format_duration(grace)
        ),
    }
    Ok(())
}

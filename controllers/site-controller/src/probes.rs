//! Probe and metrics server
//!
//! `GET /healthz` answers as long as the process serves requests;
//! `GET /metrics` exposes the Prometheus registry.

use crate::error::ControllerError;
use crate::metrics::ReconcileMetrics;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Builds the probe router
pub fn router(metrics: ReconcileMetrics) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .with_state(metrics)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text(State(metrics): State<ReconcileMetrics>) -> Response {
    match metrics.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves probes until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    metrics: ReconcileMetrics,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    info!("Probe server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

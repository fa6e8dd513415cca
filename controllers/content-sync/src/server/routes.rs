//! HTTP handlers
//!
//! | Route | Auth | Responses |
//! |-------|------|-----------|
//! | `GET /health` | none | 200 |
//! | `GET /metrics` | none | 200 |
//! | `POST /webhook/{provider}` | HMAC signature (when a secret is set) | 202, 200 ignored, 400, 401, 404 |
//! | `POST /sync/{namespace}/{name}` | site token | 200, 401, 409 being deleted, 500 |
//! | `DELETE /site/{namespace}/{name}` | site token | 200, 401, 500 |

use super::AppState;
use super::auth::{AuthError, authorize_site, bearer_token, verify_signature};
use super::webhook::{Provider, parse_push};
use crate::engine::SyncTrigger;
use crate::error::SyncError;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

fn reply(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn unauthorized() -> Response {
    reply(StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" }))
}

fn internal(message: String) -> Response {
    reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
}

fn auth_failure(e: AuthError, namespace: &str, name: &str) -> Response {
    match e {
        AuthError::Unauthorized => {
            warn!("Rejected unauthenticated request for {}/{}", namespace, name);
            unauthorized()
        }
        AuthError::Store(e) => {
            error!("Cannot load {}/{} to authorize request: {}", namespace, name, e);
            internal(e.to_string())
        }
    }
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// `GET /metrics`
pub async fn metrics_text(State(state): State<AppState>) -> Response {
    match state.engine.metrics().encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `POST /webhook/{provider}`
///
/// Accepted pushes are synced in the background; the provider only learns
/// that the push was accepted.
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = Provider::parse(&provider) else {
        return reply(StatusCode::NOT_FOUND, json!({ "error": format!("unknown provider {provider}") }));
    };

    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get(provider.signature_header())
            .and_then(|v| v.to_str().ok())
            .map(|v| provider.signature_hex(v));
        if !signature.is_some_and(|sig| verify_signature(secret, &body, sig)) {
            warn!("Rejected {} webhook with missing or invalid signature", provider);
            return unauthorized();
        }
    }

    let event = headers
        .get(provider.event_header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if event != "push" {
        info!("Ignoring {} {:?} event", provider, event);
        return reply(StatusCode::OK, json!({ "status": "ignored", "event": event }));
    }

    let push = match parse_push(&body) {
        Ok(Some(push)) => push,
        Ok(None) => return reply(StatusCode::OK, json!({ "status": "ignored", "reason": "not a branch push" })),
        Err(e) => {
            warn!("Invalid {} push payload: {}", provider, e);
            return reply(StatusCode::BAD_REQUEST, json!({ "error": format!("invalid payload: {e}") }));
        }
    };

    info!("{} push to {} of {}", provider, push.branch, push.repo_urls.join(", "));
    let engine = Arc::clone(&state.engine);
    let shutdown = state.shutdown.clone();
    let branch = push.branch.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => info!("Webhook dispatch for {} cancelled by shutdown", push.branch),
            result = engine.sync_matching(&push.repo_urls, &push.branch) => match result {
                Ok(report) => info!(
                    "Webhook dispatch for {}: {} matched, {} synced, {} failed",
                    push.branch, report.matched, report.synced, report.failed
                ),
                Err(e) => error!("Webhook dispatch for {} failed: {}", push.branch, e),
            },
        }
    });

    reply(StatusCode::ACCEPTED, json!({ "status": "accepted", "branch": branch }))
}

/// `POST /sync/{namespace}/{name}`
pub async fn manual_sync(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let site = match authorize_site(&state.engine, &namespace, &name, bearer_token(&headers)).await {
        Ok(site) => site,
        Err(e) => return auth_failure(e, &namespace, &name),
    };
    match state.engine.sync_record(&site, SyncTrigger::Manual).await {
        Ok(commit) => reply(StatusCode::OK, json!({ "status": "synced", "commit": commit })),
        Err(e @ SyncError::SiteDeleting(_)) => reply(StatusCode::CONFLICT, json!({ "error": e.to_string() })),
        Err(e) => internal(e.to_string()),
    }
}

/// `DELETE /site/{namespace}/{name}`
pub async fn delete_site(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = authorize_site(&state.engine, &namespace, &name, bearer_token(&headers)).await {
        return auth_failure(e, &namespace, &name);
    }
    match state.engine.delete_site(&namespace, &name).await {
        Ok(removed) => reply(StatusCode::OK, json!({ "status": "deleted", "removed": removed })),
        Err(e) => {
            error!("Failed to delete content of {}/{}: {}", namespace, name, e);
            internal(e.to_string())
        }
    }
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod routes_test;

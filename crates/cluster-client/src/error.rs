//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the record store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request did not complete within the configured timeout
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object with the generated name belongs to another owner
    #[error("Owned by another site: {0}")]
    Owned(String),

    /// Resource is missing required fields
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Generic API failure (used by mocks and non-Kubernetes errors)
    #[error("API error: {0}")]
    Api(String),
}

impl StoreError {
    /// Maps a kube error, surfacing 404 and 409 as dedicated variants
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(what.to_string()),
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(what.to_string()),
            _ => StoreError::Kube(err),
        }
    }
}

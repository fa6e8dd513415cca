//! Sync engine error types.

use cluster_client::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while mirroring site content.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Repository URL could not be parsed
    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),

    /// Repository URL rejected by the host allowlist
    #[error("Repository not allowed: {0}")]
    RepoNotAllowed(String),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Record store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Record does not exist
    #[error("StaticSite {0} not found")]
    SiteNotFound(String),

    /// Record is being deleted and gets no new content
    #[error("StaticSite {0} is being deleted")]
    SiteDeleting(String),

    /// Git credentials could not be resolved
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Git error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Git transfer exceeded its deadline
    #[error("Git operation timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    /// Configured subpath is unusable
    #[error("Invalid path: {0}")]
    InvalidSubpath(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task failed
    #[error("Task failed: {0}")]
    Task(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SyncError {
    /// Whether the failure is a policy or configuration rejection that
    /// retrying cannot fix without a spec change
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidRepoUrl(_)
                | SyncError::RepoNotAllowed(_)
                | SyncError::InvalidSubpath(_)
        )
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

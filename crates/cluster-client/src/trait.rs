//! Client traits for mocking
//!
//! These traits abstract the Kubernetes API so reconcilers and the sync
//! engine can be unit tested against in-memory implementations.

use crate::error::StoreError;
use crate::resources::EdgeResource;
use crds::StaticSite;
use std::collections::BTreeMap;

/// Record store operations on StaticSite resources and Git credential secrets
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SiteStoreTrait: Send + Sync {
    /// Fetch one record, `None` if it does not exist
    async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<StaticSite>, StoreError>;

    /// List records in every namespace
    async fn list_sites(&self) -> Result<Vec<StaticSite>, StoreError>;

    /// Add the finalizer marker to a record
    async fn add_finalizer(&self, site: &StaticSite) -> Result<(), StoreError>;

    /// Remove the finalizer marker from a record
    async fn remove_finalizer(&self, site: &StaticSite) -> Result<(), StoreError>;

    /// Merge-patch the status subresource with the given status fields
    ///
    /// `status` is the content of `.status`; fields absent from it are left
    /// untouched.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Fetch a Secret as a decoded key/value map, `None` if it does not exist
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError>;
}

/// Typed get/create/update/delete for one downstream resource kind
///
/// Implementations are bound to a single namespace. `update` must carry the
/// `resourceVersion` obtained from `get` and fails with
/// [`StoreError::Conflict`] when it is stale.
#[async_trait::async_trait]
pub trait ResourceClientTrait<R: EdgeResource>: Send + Sync {
    /// Fetch a resource by name, `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<R>, StoreError>;

    /// Create a resource
    async fn create(&self, resource: &R) -> Result<R, StoreError>;

    /// Replace a resource using its resourceVersion for optimistic concurrency
    async fn update(&self, resource: &R) -> Result<R, StoreError>;

    /// Delete a resource; returns `false` if it was already absent
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteEventType {
    /// Informational
    Normal,
    /// Something went wrong
    Warning,
}

/// Diagnostic event attached to a StaticSite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEvent {
    /// Severity
    pub event_type: SiteEventType,
    /// Short CamelCase reason
    pub reason: String,
    /// Human readable note
    pub note: String,
}

/// Publishes diagnostic events for StaticSite records
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event referencing `site`
    async fn publish(&self, site: &StaticSite, event: SiteEvent) -> Result<(), StoreError>;
}

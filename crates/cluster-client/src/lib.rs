//! Cluster clients for the Sitehost controllers
//!
//! Typed access to everything the controllers read or write in the cluster:
//! StaticSite records and their status, Git credential Secrets, diagnostic
//! Events, and the downstream routing/TLS resources (Traefik `Middleware`,
//! `IngressRoute`, cert-manager `Certificate`).
//!
//! Controllers depend on the traits in [`client_trait`] only. The
//! Kubernetes-backed implementations are created through a
//! [`ResourceRegistry`] built once at startup; in-memory mocks are available
//! behind the `test-util` feature.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{IngressRoute, ResourceClientTrait, ResourceRegistry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let registry = ResourceRegistry::discover(&client).await;
//! let routes = registry.resource_client::<IngressRoute>(client, "sitehost-system", Duration::from_secs(15));
//! let route = routes.get("team-a-blog").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
#[path = "trait.rs"]
pub mod client_trait;
pub mod error;
pub mod patch;
pub mod registry;
pub mod resources;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{KubeEventPublisher, KubeResourceClient, KubeSiteStore};
pub use client_trait::{EventPublisher, ResourceClientTrait, SiteEvent, SiteEventType, SiteStoreTrait};
pub use error::StoreError;
pub use patch::{merge_patch, patch_changes};
pub use registry::{ResourceKind, ResourceRegistry};
pub use resources::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEventPublisher, MockResourceClient, MockSiteStore};

//! Test utilities for unit testing the reconciler
//!
//! Helpers for creating test records and a reconciler wired to in-memory
//! clients.

use crate::config::ReconcilerConfig;
use crate::metrics::ReconcileMetrics;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use cluster_client::{
    Certificate, IngressRoute, Middleware, MockEventPublisher, MockResourceClient, MockSiteStore,
};
use crds::{StaticSite, StaticSiteSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

/// Helper to create a test StaticSite record
pub fn create_test_site(namespace: &str, name: &str, domain: Option<&str>, path_prefix: Option<&str>) -> StaticSite {
    StaticSite {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: StaticSiteSpec {
            repo: "https://git.example.com/team/site.git".to_string(),
            branch: "main".to_string(),
            path: "/".to_string(),
            domain: domain.map(str::to_string),
            path_prefix: path_prefix.map(str::to_string),
            ..Default::default()
        },
        status: None,
    }
}

/// Reconciler configuration used in tests
pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        base_domain: "sites.example.com".to_string(),
        serving_namespace: "sitehost-system".to_string(),
        wildcard_tls_secret: "wildcard-tls".to_string(),
        cluster_issuer: "letsencrypt-prod".to_string(),
        static_service_name: "static-server".to_string(),
        static_service_port: 80,
        entry_point: "websecure".to_string(),
    }
}

/// Reconciler plus handles on every mock it talks to
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub store: MockSiteStore,
    pub middlewares: MockResourceClient<Middleware>,
    pub routes: MockResourceClient<IngressRoute>,
    pub certificates: MockResourceClient<Certificate>,
    pub events: MockEventPublisher,
}

impl TestHarness {
    /// Creates a harness with empty mocks
    pub fn new() -> Self {
        let store = MockSiteStore::new();
        let middlewares = MockResourceClient::new();
        let routes = MockResourceClient::new();
        let certificates = MockResourceClient::new();
        let events = MockEventPublisher::new();
        let reconciler = Reconciler::new(
            test_config(),
            Arc::new(store.clone()),
            Arc::new(middlewares.clone()),
            Arc::new(routes.clone()),
            Arc::new(certificates.clone()),
            Arc::new(events.clone()),
            ReconcileMetrics::new().unwrap(),
        );
        Self { reconciler, store, middlewares, routes, certificates, events }
    }

    /// Runs one pass
    pub async fn reconcile(&self, namespace: &str, name: &str) -> ReconcileOutcome {
        self.reconciler.reconcile(namespace, name).await.unwrap()
    }

    /// Runs passes until the record is configured (finalizer, token, apply)
    pub async fn configure(&self, namespace: &str, name: &str) -> ReconcileOutcome {
        assert_eq!(self.reconcile(namespace, name).await, ReconcileOutcome::FinalizerAdded);
        assert_eq!(self.reconcile(namespace, name).await, ReconcileOutcome::TokenMinted);
        self.reconcile(namespace, name).await
    }
}

//! Resource registry
//!
//! Holds the API coordinates of every downstream kind. Built once at startup
//! and handed to both controllers, so nothing looks up kinds through global
//! state.

use crate::client::{KubeEventPublisher, KubeResourceClient, KubeSiteStore};
use crate::resources::EdgeResource;
use kube::api::{ApiResource, GroupVersionKind};
use kube::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Downstream kinds managed by the site controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// traefik.io/v1alpha1 Middleware
    Middleware,
    /// traefik.io/v1alpha1 IngressRoute
    IngressRoute,
    /// cert-manager.io/v1 Certificate
    Certificate,
}

impl ResourceKind {
    /// All managed kinds
    pub const ALL: [ResourceKind; 3] =
        [ResourceKind::Middleware, ResourceKind::IngressRoute, ResourceKind::Certificate];

    /// Group, version and kind
    pub fn gvk(self) -> GroupVersionKind {
        match self {
            ResourceKind::Middleware => GroupVersionKind::gvk("traefik.io", "v1alpha1", "Middleware"),
            ResourceKind::IngressRoute => GroupVersionKind::gvk("traefik.io", "v1alpha1", "IngressRoute"),
            ResourceKind::Certificate => GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"),
        }
    }

    /// Plural resource name
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Middleware => "middlewares",
            ResourceKind::IngressRoute => "ingressroutes",
            ResourceKind::Certificate => "certificates",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.gvk().kind)
    }
}

/// API coordinates of the downstream kinds plus client factories
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    middleware: ApiResource,
    ingress_route: ApiResource,
    certificate: ApiResource,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        let static_coords = |kind: ResourceKind| ApiResource::from_gvk_with_plural(&kind.gvk(), kind.plural());
        Self {
            middleware: static_coords(ResourceKind::Middleware),
            ingress_route: static_coords(ResourceKind::IngressRoute),
            certificate: static_coords(ResourceKind::Certificate),
        }
    }
}

impl ResourceRegistry {
    /// Resolves each kind against the API server.
    ///
    /// Kinds that cannot be discovered (CRD not installed yet, RBAC) keep
    /// their built-in coordinates; requests for them fail later and are
    /// retried by the reconcile loop.
    pub async fn discover(client: &Client) -> Self {
        let mut registry = Self::default();
        for kind in ResourceKind::ALL {
            match kube::discovery::pinned_kind(client, &kind.gvk()).await {
                Ok((resource, _caps)) => {
                    debug!("Discovered {} as {}/{}", kind, resource.api_version, resource.plural);
                    *registry.slot_mut(kind) = resource;
                }
                Err(e) => {
                    warn!("Could not discover {} ({}), using built-in coordinates", kind, e);
                }
            }
        }
        registry
    }

    /// ApiResource for a kind
    pub fn api_resource(&self, kind: ResourceKind) -> &ApiResource {
        match kind {
            ResourceKind::Middleware => &self.middleware,
            ResourceKind::IngressRoute => &self.ingress_route,
            ResourceKind::Certificate => &self.certificate,
        }
    }

    fn slot_mut(&mut self, kind: ResourceKind) -> &mut ApiResource {
        match kind {
            ResourceKind::Middleware => &mut self.middleware,
            ResourceKind::IngressRoute => &mut self.ingress_route,
            ResourceKind::Certificate => &mut self.certificate,
        }
    }

    /// Record store for StaticSite records and Git credential secrets
    pub fn site_store(&self, client: Client, timeout: Duration) -> KubeSiteStore {
        KubeSiteStore::new(client, timeout)
    }

    /// Typed client for one downstream kind, bound to `namespace`
    pub fn resource_client<R: EdgeResource>(
        &self,
        client: Client,
        namespace: &str,
        timeout: Duration,
    ) -> KubeResourceClient<R> {
        KubeResourceClient::new(client, self.api_resource(R::KIND).clone(), namespace, timeout)
    }

    /// Event publisher reporting as `controller`
    pub fn event_publisher(&self, client: Client, controller: &str) -> KubeEventPublisher {
        KubeEventPublisher::new(client, controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_coordinates() {
        let registry = ResourceRegistry::default();
        let mw = registry.api_resource(ResourceKind::Middleware);
        assert_eq!(mw.api_version, "traefik.io/v1alpha1");
        assert_eq!(mw.plural, "middlewares");

        let cert = registry.api_resource(ResourceKind::Certificate);
        assert_eq!(cert.group, "cert-manager.io");
        assert_eq!(cert.kind, "Certificate");
        assert_eq!(cert.plural, "certificates");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ResourceKind::IngressRoute.to_string(), "IngressRoute");
    }
}

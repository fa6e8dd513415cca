//! Middleware and IngressRoute reconciliation
//!
//! Both objects are exclusive to one site and live in the serving namespace,
//! named after the site identity so two tenants never share them. The owner
//! label is checked before an existing object is updated or deleted.

use super::{ApplyError, Reconciler};
use crate::reconcile_helpers::{apply_resource, delete_owned_resource};
use cluster_client::{
    ResourceMeta, RouteParams, SITE_LABEL, StoreError, build_ingress_route, build_middleware,
};
use crds::StaticSite;
use crds::naming::{middleware_name, site_name};

const MIDDLEWARE_KIND: &str = "Middleware";
const INGRESS_ROUTE_KIND: &str = "IngressRoute";

/// Metadata for an object owned by exactly one site
fn exclusive_meta(site: &StaticSite, name: String) -> ResourceMeta {
    let owner = site_name(site.namespace_or_default(), site.name_or_empty());
    ResourceMeta::managed(name).with_label(SITE_LABEL, owner)
}

impl Reconciler {
    /// Applies the path-rewrite middleware and returns its name
    pub(crate) async fn ensure_middleware(&self, site: &StaticSite) -> Result<String, ApplyError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        let prefix = site_name(namespace, name);
        let desired = build_middleware(
            exclusive_meta(site, middleware_name(namespace, name)),
            &prefix,
            site.path_prefix(),
        );
        let (applied, _) = apply_resource(self.middlewares.as_ref(), desired)
            .await
            .map_err(|e| ApplyError::new(MIDDLEWARE_KIND, e))?;
        Ok(applied.meta.name)
    }

    /// Applies the routing rule and returns its name
    pub(crate) async fn ensure_ingress_route(
        &self,
        site: &StaticSite,
        domain: &str,
        middleware: &str,
        tls_secret: &str,
    ) -> Result<String, ApplyError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        let params = RouteParams {
            domain,
            path_prefix: site.path_prefix().map(|p| p.trim_end_matches('/')),
            entry_point: &self.config.entry_point,
            middleware,
            middleware_namespace: &self.config.serving_namespace,
            service_name: &self.config.static_service_name,
            service_port: self.config.static_service_port,
            tls_secret,
        };
        let desired = build_ingress_route(exclusive_meta(site, site_name(namespace, name)), &params);
        let (applied, _) = apply_resource(self.routes.as_ref(), desired)
            .await
            .map_err(|e| ApplyError::new(INGRESS_ROUTE_KIND, e))?;
        Ok(applied.meta.name)
    }

    /// Deletes the site's IngressRoute and Middleware
    pub(crate) async fn delete_routing(&self, site: &StaticSite) -> Result<(), StoreError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        let owner = site_name(namespace, name);
        // Route first so traffic stops before its middleware disappears.
        delete_owned_resource(self.routes.as_ref(), &owner, &owner).await?;
        delete_owned_resource(self.middlewares.as_ref(), &middleware_name(namespace, name), &owner).await?;
        Ok(())
    }
}

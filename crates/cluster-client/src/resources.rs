//! Typed downstream resources
//!
//! Traefik `Middleware` / `IngressRoute` and cert-manager `Certificate` are
//! owned by external schemas. They are modelled here as small typed structs;
//! conversion to and from the untyped `DynamicObject` used on the wire lives
//! only in this module.

use crate::error::StoreError;
use crate::registry::ResourceKind;
use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label marking objects managed by the site controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "sitehost-controller";
/// Label carrying the generated name of the owning site (exclusive resources only)
pub const SITE_LABEL: &str = "sitehost.microscaler.io/site";
/// Label carrying the certificate domain (shared certificates only)
pub const DOMAIN_LABEL: &str = "sitehost.microscaler.io/domain";

/// Metadata common to every downstream resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Object name
    pub name: String,
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Optimistic concurrency token; `None` for objects not yet created
    pub resource_version: Option<String>,
}

impl ResourceMeta {
    /// Metadata for a new managed object
    pub fn managed(name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        Self { name: name.into(), labels, resource_version: None }
    }

    /// Adds a label
    #[must_use]
    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    fn to_object_meta(&self, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: if self.labels.is_empty() { None } else { Some(self.labels.clone()) },
            resource_version: self.resource_version.clone(),
            ..Default::default()
        }
    }

    fn from_object_meta(meta: &ObjectMeta) -> Result<Self, StoreError> {
        let name = meta
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidResource("object without name".to_string()))?;
        Ok(Self {
            name,
            labels: meta.labels.clone().unwrap_or_default(),
            resource_version: meta.resource_version.clone(),
        })
    }
}

/// A downstream resource with a typed spec
pub trait EdgeResource: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Kind used to look up the ApiResource in the registry
    const KIND: ResourceKind;

    /// Common metadata
    fn meta(&self) -> &ResourceMeta;

    /// Mutable common metadata
    fn meta_mut(&mut self) -> &mut ResourceMeta;

    /// Wire payload (everything except metadata)
    fn data(&self) -> Result<serde_json::Value, StoreError>;

    /// Rebuild from metadata and wire payload
    fn from_parts(meta: ResourceMeta, data: &serde_json::Value) -> Result<Self, StoreError>;

    /// Object name
    fn name(&self) -> &str {
        &self.meta().name
    }

    /// Builds the untyped object sent to the API server
    fn to_dynamic(&self, api_resource: &ApiResource, namespace: &str) -> Result<DynamicObject, StoreError> {
        let mut obj = DynamicObject::new(&self.meta().name, api_resource).data(self.data()?);
        obj.metadata = self.meta().to_object_meta(namespace);
        Ok(obj)
    }

    /// Parses an untyped object returned by the API server
    fn from_dynamic(obj: &DynamicObject) -> Result<Self, StoreError> {
        let meta = ResourceMeta::from_object_meta(&obj.metadata)?;
        Self::from_parts(meta, &obj.data)
    }
}

fn field<T: serde::de::DeserializeOwned>(data: &serde_json::Value, key: &str) -> Result<Option<T>, StoreError> {
    match data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

fn required<T: serde::de::DeserializeOwned>(data: &serde_json::Value, key: &str) -> Result<T, StoreError> {
    field(data, key)?.ok_or_else(|| StoreError::InvalidResource(format!("missing {key}")))
}

// ---------------------------------------------------------------------------
// Middleware (traefik.io/v1alpha1)
// ---------------------------------------------------------------------------

/// Path-rewrite middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Middleware {
    /// Metadata
    pub meta: ResourceMeta,
    /// Spec
    pub spec: MiddlewareSpec,
}

/// Middleware spec (only the rewrite variants used here)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareSpec {
    /// Prepend a fixed prefix to the request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_prefix: Option<AddPrefix>,

    /// Rewrite the request path with a regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_path_regex: Option<ReplacePathRegex>,
}

/// `addPrefix` middleware
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddPrefix {
    /// Prefix to add
    pub prefix: String,
}

/// `replacePathRegex` middleware
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplacePathRegex {
    /// Regex matched against the request path
    pub regex: String,
    /// Replacement
    pub replacement: String,
}

impl EdgeResource for Middleware {
    const KIND: ResourceKind = ResourceKind::Middleware;

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn data(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({ "spec": serde_json::to_value(&self.spec)? }))
    }

    fn from_parts(meta: ResourceMeta, data: &serde_json::Value) -> Result<Self, StoreError> {
        Ok(Self { meta, spec: field(data, "spec")?.unwrap_or_default() })
    }
}

/// Builds the rewrite middleware for a site.
///
/// Without a path prefix every request gets `/<site_prefix>` prepended. With
/// a path prefix, the prefix is replaced by `/<site_prefix>`.
pub fn build_middleware(meta: ResourceMeta, site_prefix: &str, path_prefix: Option<&str>) -> Middleware {
    let spec = match path_prefix {
        None => MiddlewareSpec {
            add_prefix: Some(AddPrefix { prefix: format!("/{site_prefix}") }),
            replace_path_regex: None,
        },
        Some(prefix) => {
            let prefix = prefix.trim_end_matches('/');
            MiddlewareSpec {
                add_prefix: None,
                replace_path_regex: Some(ReplacePathRegex {
                    regex: format!("^{}(/(.*))?$", escape_regex(prefix)),
                    replacement: format!("/{site_prefix}/${{2}}"),
                }),
            }
        }
    };
    Middleware { meta, spec }
}

fn escape_regex(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

// ---------------------------------------------------------------------------
// IngressRoute (traefik.io/v1alpha1)
// ---------------------------------------------------------------------------

/// Host/path routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRoute {
    /// Metadata
    pub meta: ResourceMeta,
    /// Spec
    pub spec: IngressRouteSpec,
}

/// IngressRoute spec
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteSpec {
    /// Entry points the route is attached to
    #[serde(default)]
    pub entry_points: Vec<String>,
    /// Routes
    #[serde(default)]
    pub routes: Vec<Route>,
    /// TLS configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

/// One route of an IngressRoute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    /// Match expression, e.g. ``Host(`a.example.com`)``
    #[serde(rename = "match")]
    pub match_rule: String,
    /// Always "Rule"
    pub kind: String,
    /// Middlewares applied to the route
    #[serde(default)]
    pub middlewares: Vec<ObjectRef>,
    /// Backend services
    #[serde(default)]
    pub services: Vec<ServiceRef>,
}

/// Reference to a namespaced object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    /// Name
    pub name: String,
    /// Namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Backend service reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRef {
    /// Service name
    pub name: String,
    /// Service port
    pub port: u16,
}

/// TLS termination settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    /// Secret holding the certificate
    pub secret_name: String,
}

impl EdgeResource for IngressRoute {
    const KIND: ResourceKind = ResourceKind::IngressRoute;

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn data(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({ "spec": serde_json::to_value(&self.spec)? }))
    }

    fn from_parts(meta: ResourceMeta, data: &serde_json::Value) -> Result<Self, StoreError> {
        Ok(Self { meta, spec: field(data, "spec")?.unwrap_or_default() })
    }
}

/// Inputs for [`build_ingress_route`]
#[derive(Debug, Clone)]
pub struct RouteParams<'a> {
    /// Host to match
    pub domain: &'a str,
    /// Optional path prefix to match
    pub path_prefix: Option<&'a str>,
    /// Entry point name
    pub entry_point: &'a str,
    /// Rewrite middleware name
    pub middleware: &'a str,
    /// Namespace of the middleware
    pub middleware_namespace: &'a str,
    /// Static server service
    pub service_name: &'a str,
    /// Static server port
    pub service_port: u16,
    /// TLS secret
    pub tls_secret: &'a str,
}

/// Builds the routing rule for a site.
///
/// A prefix matches only whole path segments, the same paths the rewrite
/// middleware handles.
pub fn build_ingress_route(meta: ResourceMeta, params: &RouteParams<'_>) -> IngressRoute {
    let match_rule = match params.path_prefix {
        Some(prefix) => format!("Host(`{}`) && PathRegexp(`^{}(/|$)`)", params.domain, escape_regex(prefix)),
        None => format!("Host(`{}`)", params.domain),
    };
    IngressRoute {
        meta,
        spec: IngressRouteSpec {
            entry_points: vec![params.entry_point.to_string()],
            routes: vec![Route {
                match_rule,
                kind: "Rule".to_string(),
                middlewares: vec![ObjectRef {
                    name: params.middleware.to_string(),
                    namespace: Some(params.middleware_namespace.to_string()),
                }],
                services: vec![ServiceRef {
                    name: params.service_name.to_string(),
                    port: params.service_port,
                }],
            }],
            tls: Some(RouteTls { secret_name: params.tls_secret.to_string() }),
        },
    }
}

// ---------------------------------------------------------------------------
// Certificate (cert-manager.io/v1)
// ---------------------------------------------------------------------------

/// TLS certificate shared by every site on one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Metadata
    pub meta: ResourceMeta,
    /// Spec
    pub spec: CertificateSpec,
    /// Status written by cert-manager
    pub status: Option<CertificateStatus>,
}

/// Certificate spec
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Secret the issued certificate is stored in
    pub secret_name: String,
    /// Domains covered by the certificate
    pub dns_names: Vec<String>,
    /// Issuer
    pub issuer_ref: IssuerRef,
}

/// Issuer reference
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuerRef {
    /// Issuer name
    pub name: String,
    /// Issuer kind (ClusterIssuer or Issuer)
    pub kind: String,
}

/// Certificate status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateStatus {
    /// Conditions reported by cert-manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<CertificateCondition>>,
}

/// Condition reported by cert-manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateCondition {
    /// Condition type (e.g. "Ready", "Issuing")
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EdgeResource for Certificate {
    const KIND: ResourceKind = ResourceKind::Certificate;

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    // Status is owned by cert-manager and never sent.
    fn data(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({ "spec": serde_json::to_value(&self.spec)? }))
    }

    fn from_parts(meta: ResourceMeta, data: &serde_json::Value) -> Result<Self, StoreError> {
        Ok(Self {
            meta,
            spec: required(data, "spec")?,
            status: field(data, "status")?,
        })
    }
}

/// Builds the shared certificate for a domain
pub fn build_certificate(meta: ResourceMeta, domain: &str, secret_name: &str, cluster_issuer: &str) -> Certificate {
    Certificate {
        meta,
        spec: CertificateSpec {
            secret_name: secret_name.to_string(),
            dns_names: vec![domain.to_string()],
            issuer_ref: IssuerRef { name: cluster_issuer.to_string(), kind: "ClusterIssuer".to_string() },
        },
        status: None,
    }
}

//! StaticSite CRD
//!
//! Declares a static website served from a Git repository. The spec is
//! authored by the tenant; the status is written by two controllers that own
//! disjoint fields (see [`StaticSiteStatus`]).

use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer placed on every StaticSite by the site controller.
pub const SITE_FINALIZER: &str = "sitehost.microscaler.io/finalizer";

/// Textual format of `status.lastSync` (RFC 3339, second precision, UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Value of `spec.path` / `spec.pathPrefix` that denotes the root.
pub const ROOT_PATH: &str = "/";

/// StaticSiteSpec defines the desired state of a hosted site
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "sitehost.microscaler.io",
    version = "v1alpha1",
    kind = "StaticSite",
    namespaced,
    status = "StaticSiteStatus",
    shortname = "site",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#,
    printcolumn = r#"{"name":"Commit","type":"string","jsonPath":".status.lastCommit"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StaticSiteSpec {
    /// Git repository URL (http or https)
    pub repo: String,

    /// Branch to mirror
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Directory inside the repository to serve (defaults to the repository root)
    #[serde(default = "default_path")]
    pub path: String,

    /// Custom domain (defaults to `<name>.<base domain>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Path prefix under the custom domain (requires `domain`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    /// Secret holding Git credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,

    /// Sync interval hint (e.g. "5m"); the sync engine skips periodic syncs
    /// younger than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_path() -> String {
    ROOT_PATH.to_string()
}

/// Reference to a Secret key holding a Git password or token
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Name of the Secret (same namespace as the StaticSite)
    pub name: String,

    /// Key holding the password or token
    #[serde(default = "default_password_key")]
    pub key: String,

    /// Key holding the username (the sync engine's default username is used if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_key: Option<String>,
}

fn default_password_key() -> String {
    "password".to_string()
}

/// StaticSiteStatus defines the observed state of a hosted site
///
/// The site controller owns `url`, `authToken`, `conditions`, `resources`
/// and `observedGeneration`; the sync engine owns `lastSync` and
/// `lastCommit`. Both write `phase` and `message`. Every writer uses merge
/// patches so fields of the other writer are never clobbered.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticSiteStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: SitePhase,

    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Externally visible URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Per-site token authorising manual sync/delete calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Timestamp of the last content sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,

    /// Short hash of the last synced commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,

    /// Conditions (Ready, Synced, IngressReady, CertificateReady)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Names of the generated resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<GeneratedResources>,

    /// Generation last handled by the site controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Names of the resources generated for a site
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResources {
    /// Path-rewrite middleware
    pub middleware: String,

    /// Routing rule
    pub ingress_route: String,

    /// Shared certificate (custom domains only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// TLS secret referenced by the routing rule
    pub tls_secret: String,
}

/// Site lifecycle phase
///
/// Serializes as PascalCase ("Ready", "Error", etc.).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum SitePhase {
    /// Not reconciled yet
    #[default]
    Pending,

    /// Content sync in progress
    Syncing,

    /// Configured (and possibly synced)
    Ready,

    /// Configuration, infrastructure or content error
    Error,
}

impl SitePhase {
    /// PascalCase representation used in status patches
    pub fn as_str(self) -> &'static str {
        match self {
            SitePhase::Pending => "Pending",
            SitePhase::Syncing => "Syncing",
            SitePhase::Ready => "Ready",
            SitePhase::Error => "Error",
        }
    }
}

impl std::fmt::Display for SitePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StaticSite {
    /// Namespace of the record ("default" when unset)
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Name of the record (empty when unset)
    pub fn name_or_empty(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Whether the finalizer marker is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|f| f == SITE_FINALIZER))
    }

    /// Whether deletion has been requested
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Minted authentication token, if any
    pub fn auth_token(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.auth_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Custom domain, ignoring empty strings
    pub fn custom_domain(&self) -> Option<&str> {
        self.spec.domain.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    /// Path prefix, ignoring empty strings
    pub fn path_prefix(&self) -> Option<&str> {
        self.spec.path_prefix.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// Subpath to serve, `None` when the repository root is served
    pub fn subpath(&self) -> Option<&str> {
        let trimmed = self.spec.path.trim().trim_matches('/');
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    /// Effective domain: the custom domain or `<name>.<base_domain>`
    pub fn effective_domain(&self, base_domain: &str) -> String {
        match self.custom_domain() {
            Some(domain) => domain.to_ascii_lowercase(),
            None => format!("{}.{}", self.name_or_empty(), base_domain),
        }
    }

    /// Last sync time, if recorded in the expected format
    pub fn last_sync(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.status.as_ref()?.last_sync.as_deref()?;
        chrono::NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .ok()
            .map(|t| t.and_utc())
    }
}

/// Formats a timestamp for `status.lastSync`
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

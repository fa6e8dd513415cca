//! Controller configuration
//!
//! Loaded once from environment variables at startup.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Settings that shape the generated resources
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Base domain for sites without a custom domain (`<name>.<base_domain>`)
    pub base_domain: String,
    /// Namespace holding the generated Middleware/IngressRoute/Certificate objects
    pub serving_namespace: String,
    /// TLS secret used for `<name>.<base_domain>` hosts
    pub wildcard_tls_secret: String,
    /// ClusterIssuer referenced by generated certificates
    pub cluster_issuer: String,
    /// Static file server service
    pub static_service_name: String,
    /// Static file server port
    pub static_service_port: u16,
    /// Traefik entry point
    pub entry_point: String,
}

/// Full controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Reconciler settings
    pub reconciler: ReconcilerConfig,
    /// Namespace to watch; all namespaces when `None`
    pub watch_namespace: Option<String>,
    /// Listen address of the probe/metrics server
    pub probe_addr: SocketAddr,
    /// Timeout applied to every API call
    pub api_timeout: Duration,
}

impl Config {
    /// Loads the configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let base_domain = lookup("BASE_DOMAIN")
            .map(|v| v.trim().trim_matches('.').to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("BASE_DOMAIN environment variable is required".to_string())
            })?;

        let port_raw = get("STATIC_SERVICE_PORT", "80");
        let static_service_port = port_raw
            .parse::<u16>()
            .map_err(|e| ControllerError::InvalidConfig(format!("STATIC_SERVICE_PORT={port_raw}: {e}")))?;

        let probe_raw = get("PROBE_ADDR", "0.0.0.0:8081");
        let probe_addr = probe_raw
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("PROBE_ADDR={probe_raw}: {e}")))?;

        let timeout_raw = get("API_TIMEOUT", "15s");
        let api_timeout = humantime::parse_duration(&timeout_raw)
            .map_err(|e| ControllerError::InvalidConfig(format!("API_TIMEOUT={timeout_raw}: {e}")))?;

        Ok(Self {
            reconciler: ReconcilerConfig {
                base_domain,
                serving_namespace: get("SERVING_NAMESPACE", "sitehost-system"),
                wildcard_tls_secret: get("WILDCARD_TLS_SECRET", "wildcard-tls"),
                cluster_issuer: get("CLUSTER_ISSUER", "letsencrypt-prod"),
                static_service_name: get("STATIC_SERVICE_NAME", "static-server"),
                static_service_port,
                entry_point: get("ENTRY_POINT", "websecure"),
            },
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.trim().is_empty()),
            probe_addr,
            api_timeout,
        })
    }

    /// Logs the effective configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Base domain: {}", self.reconciler.base_domain);
        info!("  Serving namespace: {}", self.reconciler.serving_namespace);
        info!("  Wildcard TLS secret: {}", self.reconciler.wildcard_tls_secret);
        info!("  Cluster issuer: {}", self.reconciler.cluster_issuer);
        info!(
            "  Static server: {}:{}",
            self.reconciler.static_service_name, self.reconciler.static_service_port
        );
        info!("  Entry point: {}", self.reconciler.entry_point);
        info!("  Namespace: {}", self.watch_namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Probe address: {}", self.probe_addr);
        info!("  API timeout: {}", humantime::format_duration(self.api_timeout));
    }
}

//! Sync engine configuration
//!
//! Loaded once from environment variables at startup.

use crate::error::SyncError;
use crate::validate::HostAllowlist;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Full sync engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the shared content volume
    pub content_root: PathBuf,
    /// Git hosts content may be fetched from
    pub allowed_hosts: HostAllowlist,
    /// Period of the full sync pass
    pub sync_interval: Duration,
    /// Shared secret for webhook signatures; signatures are not checked when `None`
    pub webhook_secret: Option<String>,
    /// Listen address of the HTTP front end
    pub listen_addr: SocketAddr,
    /// Deadline for one clone or pull
    pub git_timeout: Duration,
    /// Timeout applied to every API call
    pub api_timeout: Duration,
    /// Time in-flight requests get to finish after shutdown
    pub shutdown_grace: Duration,
    /// Git username used when a secret does not name one
    pub default_username: String,
}

impl Config {
    /// Loads the configuration from the process environment
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let duration = |key: &str, default: &str| {
            let raw = get(key, default);
            humantime::parse_duration(&raw).map_err(|e| SyncError::InvalidConfig(format!("{key}={raw}: {e}")))
        };

        let allowed_hosts = HostAllowlist::parse(&lookup("ALLOWED_GIT_HOSTS").unwrap_or_default());
        if allowed_hosts.is_empty() {
            return Err(SyncError::InvalidConfig(
                "ALLOWED_GIT_HOSTS must list at least one Git host".to_string(),
            ));
        }

        let listen_raw = get("LISTEN_ADDR", "0.0.0.0:8080");
        let listen_addr = listen_raw
            .parse::<SocketAddr>()
            .map_err(|e| SyncError::InvalidConfig(format!("LISTEN_ADDR={listen_raw}: {e}")))?;

        let sync_interval = duration("SYNC_INTERVAL", "5m")?;
        if sync_interval.is_zero() {
            return Err(SyncError::InvalidConfig("SYNC_INTERVAL must be positive".to_string()));
        }

        Ok(Self {
            content_root: PathBuf::from(get("CONTENT_ROOT", "/srv/sites")),
            allowed_hosts,
            sync_interval,
            webhook_secret: lookup("WEBHOOK_SECRET").filter(|v| !v.trim().is_empty()),
            listen_addr,
            git_timeout: duration("GIT_TIMEOUT", "120s")?,
            api_timeout: duration("API_TIMEOUT", "15s")?,
            shutdown_grace: duration("SHUTDOWN_GRACE", "10s")?,
            default_username: get("GIT_DEFAULT_USERNAME", "git"),
        })
    }

    /// Logs the effective configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Content root: {}", self.content_root.display());
        info!("  Allowed Git hosts ({}): {}", self.allowed_hosts.len(), self.allowed_hosts);
        info!("  Sync interval: {}", humantime::format_duration(self.sync_interval));
        info!("  Listen address: {}", self.listen_addr);
        info!("  Git timeout: {}", humantime::format_duration(self.git_timeout));
        info!("  API timeout: {}", humantime::format_duration(self.api_timeout));
        info!("  Shutdown grace: {}", humantime::format_duration(self.shutdown_grace));
        info!("  Default Git username: {}", self.default_username);
        if self.webhook_secret.is_some() {
            info!("  Webhook signatures: required");
        } else {
            warn!("  Webhook signatures: NOT VERIFIED (WEBHOOK_SECRET is unset, anyone can trigger syncs)");
        }
    }
}

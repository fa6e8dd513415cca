//! Sync engine
//!
//! Mirrors each StaticSite's repository onto the content volume:
//!
//! 1. check the repository URL against the host allowlist
//! 2. resolve Git credentials from the referenced Secret
//! 3. lay out the site's directories (direct clone or hidden clone + symlink)
//! 4. clone or pull the branch and record the short commit hash
//! 5. point the serving symlink at the subpath, if one is configured
//! 6. merge-patch `phase`, `message`, `lastSync` and `lastCommit`
//!
//! A failing site is reported on its own status and never stops a pass.
//! Status patch failures are logged only; the next pass writes again.

use crate::error::SyncError;
use crate::git::{FetchRequest, GitCredentials, RepoFetcher, is_clone};
use crate::layout::ContentLayout;
use crate::locks::SiteLocks;
use crate::metrics::SyncMetrics;
use crate::validate::{HostAllowlist, normalize_repo_url};
use chrono::{DateTime, Utc};
use cluster_client::SiteStoreTrait;
use crds::naming::site_name;
use crds::{SitePhase, StaticSite, format_timestamp};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Secret key read when `secretRef.key` is empty
const DEFAULT_PASSWORD_KEY: &str = "password";

/// Branch mirrored when `spec.branch` is empty
const DEFAULT_BRANCH: &str = "main";

/// What started a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Periodic full pass
    Periodic,
    /// Provider push webhook
    Webhook,
    /// Authenticated manual call
    Manual,
}

impl SyncTrigger {
    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Webhook => "webhook",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// Engine settings that are not part of a record
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Deadline for one clone or pull
    pub git_timeout: Duration,
    /// Username used when a Secret does not name one
    pub default_username: String,
}

/// Result of a full pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Sites synced successfully
    pub synced: usize,
    /// Sites whose sync failed
    pub failed: usize,
    /// Sites skipped (being deleted or synced recently enough)
    pub skipped: usize,
    /// Orphaned entries removed
    pub removed: usize,
    /// Whether shutdown interrupted the pass
    pub cancelled: bool,
}

/// Result of a webhook dispatch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sites whose repository and branch matched
    pub matched: usize,
    /// Matching sites synced successfully
    pub synced: usize,
    /// Matching sites whose sync failed
    pub failed: usize,
}

/// Directory key of a record
pub fn site_key(site: &StaticSite) -> String {
    site_name(site.namespace_or_default(), site.name_or_empty())
}

fn branch_of(site: &StaticSite) -> &str {
    let branch = site.spec.branch.trim();
    if branch.is_empty() { DEFAULT_BRANCH } else { branch }
}

/// Whether the periodic pass should sync `site` at `now`.
///
/// A healthy site whose `syncInterval` hint has not elapsed since its last
/// sync is skipped. Unparseable hints are ignored.
pub fn is_due(site: &StaticSite, now: DateTime<Utc>) -> bool {
    let Some(hint) = site.spec.sync_interval.as_deref().map(str::trim).filter(|h| !h.is_empty()) else {
        return true;
    };
    let Ok(interval) = humantime::parse_duration(hint) else {
        debug!(
            "Ignoring invalid syncInterval {:?} on {}/{}",
            hint,
            site.namespace_or_default(),
            site.name_or_empty()
        );
        return true;
    };
    if site.status.as_ref().is_none_or(|s| s.phase != SitePhase::Ready) {
        return true;
    }
    let Some(last) = site.last_sync() else {
        return true;
    };
    (now - last).to_std().map_or(true, |elapsed| elapsed >= interval)
}

async fn blocking<T, F>(f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Mirrors repositories onto the content volume
pub struct SyncEngine {
    store: Arc<dyn SiteStoreTrait>,
    fetcher: Arc<dyn RepoFetcher>,
    layout: ContentLayout,
    allowlist: HostAllowlist,
    settings: SyncSettings,
    locks: SiteLocks,
    metrics: SyncMetrics,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("layout", &self.layout)
            .field("allowlist", &self.allowlist)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine
    pub fn new(
        store: Arc<dyn SiteStoreTrait>,
        fetcher: Arc<dyn RepoFetcher>,
        layout: ContentLayout,
        allowlist: HostAllowlist,
        settings: SyncSettings,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            store,
            fetcher,
            layout,
            allowlist,
            settings,
            locks: SiteLocks::new(),
            metrics,
        }
    }

    /// Metrics updated by the engine
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Fetches one record
    pub async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<StaticSite>, SyncError> {
        Ok(self.store.get_site(namespace, name).await?)
    }

    /// Syncs every record, then removes content no record owns.
    ///
    /// Sites are processed one at a time. Shutdown is checked between sites;
    /// a cancelled pass stops without cleanup. Cleanup works from a fresh
    /// listing so sites created during the pass keep their content.
    pub async fn sync_all(&self, shutdown: &CancellationToken) -> Result<PassReport, SyncError> {
        let sites = self.store.list_sites().await?;
        let now = Utc::now();
        let mut report = PassReport::default();

        for site in &sites {
            if shutdown.is_cancelled() {
                info!("Sync pass interrupted by shutdown");
                report.cancelled = true;
                return Ok(report);
            }
            if site.is_being_deleted() {
                report.skipped += 1;
                continue;
            }
            if !is_due(site, now) {
                debug!(
                    "Skipping {}/{}: synced within its interval",
                    site.namespace_or_default(),
                    site.name_or_empty()
                );
                report.skipped += 1;
                continue;
            }
            match self.sync_record(site, SyncTrigger::Periodic).await {
                Ok(_) => report.synced += 1,
                Err(_) => report.failed += 1,
            }
        }

        if shutdown.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        report.removed = match self.store.list_sites().await {
            Ok(current) => {
                let known: HashSet<String> = current
                    .iter()
                    .filter(|site| !site.is_being_deleted())
                    .map(site_key)
                    .collect();
                match self.cleanup(&known).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        warn!("Orphan cleanup failed: {}", e);
                        0
                    }
                }
            }
            Err(e) => {
                warn!("Skipping orphan cleanup, cannot list sites: {}", e);
                0
            }
        };
        info!(
            "Sync pass finished: {} synced, {} failed, {} skipped, {} orphaned entries removed",
            report.synced, report.failed, report.skipped, report.removed
        );
        Ok(report)
    }

    /// Fetches one record and syncs it
    pub async fn sync_site(&self, namespace: &str, name: &str, trigger: SyncTrigger) -> Result<String, SyncError> {
        let site = self
            .get_site(namespace, name)
            .await?
            .ok_or_else(|| SyncError::SiteNotFound(format!("{namespace}/{name}")))?;
        self.sync_record(&site, trigger).await
    }

    /// Syncs one record and reports the outcome on its status.
    ///
    /// Returns the short hash of the mirrored commit. Records being deleted
    /// are refused so their content is not recreated behind the cleanup.
    pub async fn sync_record(&self, site: &StaticSite, trigger: SyncTrigger) -> Result<String, SyncError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        if site.is_being_deleted() {
            debug!("Not syncing {}/{}: being deleted", namespace, name);
            return Err(SyncError::SiteDeleting(format!("{namespace}/{name}")));
        }
        let key = site_key(site);
        let _guard = self.locks.lock(&key).await;

        let first_sync = site.status.as_ref().is_none_or(|s| s.last_commit.is_none());
        if first_sync {
            self.patch_status(
                site,
                json!({
                    "phase": SitePhase::Syncing,
                    "message": format!("cloning branch {}", branch_of(site)),
                }),
            )
            .await;
        }

        let result = self.sync_content(site, &key).await;
        match &result {
            Ok(commit) => {
                info!("Synced {}/{} at {} ({})", namespace, name, commit, trigger.as_str());
                self.patch_status(
                    site,
                    json!({
                        "phase": SitePhase::Ready,
                        "message": format!("synced commit {commit}"),
                        "lastSync": format_timestamp(Utc::now()),
                        "lastCommit": commit,
                    }),
                )
                .await;
                self.metrics.synced(trigger.as_str(), "success");
            }
            Err(e) => {
                let label = if e.is_rejection() {
                    warn!("Rejected sync of {}/{}: {}", namespace, name, e);
                    "rejected"
                } else {
                    error!("Failed to sync {}/{}: {}", namespace, name, e);
                    "failed"
                };
                self.patch_status(site, json!({ "phase": SitePhase::Error, "message": e.to_string() }))
                    .await;
                self.metrics.synced(trigger.as_str(), label);
            }
        }
        result
    }

    async fn sync_content(&self, site: &StaticSite, key: &str) -> Result<String, SyncError> {
        let url = self.allowlist.validate_repo_url(&site.spec.repo)?;
        let credentials = self.resolve_credentials(site).await?;
        let subpath = site.subpath().map(str::to_string);

        let checkout = {
            let (layout, key, subpath) = (self.layout.clone(), key.to_string(), subpath.clone());
            blocking(move || Ok(layout.prepare(&key, subpath.as_deref())?)).await?
        };
        let fresh = !is_clone(&checkout);

        let request = FetchRequest {
            url: url.as_str().to_string(),
            branch: branch_of(site).to_string(),
            credentials,
            timeout: self.settings.git_timeout,
        };
        let commit = self.fetcher.fetch(request, checkout.clone()).await?;

        if let Some(subpath) = subpath {
            let (layout, link_key) = (self.layout.clone(), key.to_string());
            let linked = blocking(move || {
                let result = layout.link_subpath(&link_key, &subpath);
                if result.is_err() && fresh {
                    if let Err(e) = std::fs::remove_dir_all(&checkout) {
                        warn!("Failed to remove fresh clone {}: {}", checkout.display(), e);
                    }
                }
                result
            })
            .await;
            let target = linked?;
            debug!("Serving {} from {}", key, target.display());
        }
        Ok(commit)
    }

    /// Credentials from the record's `secretRef`, `None` without one
    pub async fn resolve_credentials(&self, site: &StaticSite) -> Result<Option<GitCredentials>, SyncError> {
        let Some(secret_ref) = &site.spec.secret_ref else {
            return Ok(None);
        };
        let namespace = site.namespace_or_default();
        let data = self
            .store
            .get_secret(namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| SyncError::Credentials(format!("Secret {namespace}/{} not found", secret_ref.name)))?;

        let lookup = |key: &str| {
            data.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| {
                    SyncError::Credentials(format!("Secret {namespace}/{} has no key {key}", secret_ref.name))
                })
        };

        let password_key = if secret_ref.key.trim().is_empty() {
            DEFAULT_PASSWORD_KEY
        } else {
            secret_ref.key.trim()
        };
        let password = lookup(password_key)?;
        let username = match secret_ref.username_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => lookup(key)?,
            None => self.settings.default_username.clone(),
        };
        Ok(Some(GitCredentials { username, password }))
    }

    /// Syncs every record mirroring one of `repo_urls` at `branch`.
    ///
    /// A linear scan over all records; matching ignores scheme, case, a
    /// trailing `/` and a `.git` suffix.
    pub async fn sync_matching(&self, repo_urls: &[String], branch: &str) -> Result<DispatchReport, SyncError> {
        let wanted: HashSet<String> = repo_urls.iter().map(|u| normalize_repo_url(u)).collect();
        let sites = self.store.list_sites().await?;
        let mut report = DispatchReport::default();

        for site in sites.iter().filter(|site| {
            !site.is_being_deleted()
                && branch_of(site) == branch
                && wanted.contains(&normalize_repo_url(&site.spec.repo))
        }) {
            report.matched += 1;
            match self.sync_record(site, SyncTrigger::Webhook).await {
                Ok(_) => report.synced += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.matched == 0 {
            debug!("No site mirrors branch {} of {}", branch, repo_urls.join(", "));
        }
        Ok(report)
    }

    /// Removes a site's serving entry and clone cache, returning how many
    /// entries existed
    pub async fn delete_site(&self, namespace: &str, name: &str) -> Result<usize, SyncError> {
        let key = site_name(namespace, name);
        let guard = self.locks.lock(&key).await;
        let removed = {
            let (layout, key) = (self.layout.clone(), key.clone());
            blocking(move || Ok(layout.remove_site(&key)?)).await?
        };
        drop(guard);
        self.locks.forget(&key);
        info!("Deleted content of {}/{} ({} entries)", namespace, name, removed);
        Ok(removed)
    }

    /// Removes content of sites not in `known`.
    ///
    /// Sites whose lock is held are left for the next pass.
    pub async fn cleanup(&self, known: &HashSet<String>) -> Result<usize, SyncError> {
        let orphans = {
            let (layout, known) = (self.layout.clone(), known.clone());
            blocking(move || Ok(layout.orphans(&known)?)).await?
        };

        let mut removed = 0;
        for key in orphans {
            let Some(guard) = self.locks.try_lock(&key) else {
                debug!("Skipping cleanup of {}: in use", key);
                continue;
            };
            let result = {
                let (layout, key) = (self.layout.clone(), key.clone());
                blocking(move || Ok(layout.remove_site(&key)?)).await
            };
            drop(guard);
            self.locks.forget(&key);
            match result {
                Ok(entries) => {
                    info!("Removed orphaned content {}", key);
                    removed += entries;
                }
                Err(e) => warn!("Failed to remove orphaned content {}: {}", key, e),
            }
        }
        self.metrics.removed(removed);
        Ok(removed)
    }

    async fn patch_status(&self, site: &StaticSite, status: serde_json::Value) {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        if let Err(e) = self.store.patch_status(namespace, name, status).await {
            warn!("Failed to update status of {}/{}: {}", namespace, name, e);
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

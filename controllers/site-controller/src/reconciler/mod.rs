//! Reconciliation logic for StaticSite records.
//!
//! One pass per watch event, level triggered and idempotent:
//!
//! 1. load the record (absent: nothing to do)
//! 2. deletion requested: tear down, release the certificate, drop the finalizer
//! 3. add the finalizer and stop
//! 4. mint the auth token and stop
//! 5. validate the spec
//! 6. apply Middleware, IngressRoute and (custom domains) the shared Certificate
//! 7. write status
//!
//! Steps 3 and 4 each end the pass, so a new record gets its downstream
//! resources on the third pass.
//!
//! - `routing`: Middleware and IngressRoute
//! - `certificate`: shared Certificate lifecycle and readiness

pub mod certificate;
pub mod routing;

use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::metrics::ReconcileMetrics;
use crate::reconcile_helpers::{
    configured_status_patch, error_status_patch, merge_conditions, status_needs_update,
};
use crate::token::generate_token;
use cluster_client::{
    Certificate, EventPublisher, IngressRoute, Middleware, ResourceClientTrait, SiteEvent, SiteEventType,
    SiteStoreTrait, StoreError,
};
use crds::{
    CONDITION_INGRESS_READY, CONDITION_READY, CONDITION_SYNCED, Condition, ConditionStatus, GeneratedResources,
    ROOT_PATH, SitePhase, StaticSite, find_condition, format_timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue delay after the finalizer was added or the token minted
pub const SHORT_REQUEUE: Duration = Duration::from_secs(1);
/// Requeue delay after an infrastructure failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);
/// Periodic resync of a configured site
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Message written on first successful configuration
pub const AWAITING_SYNC_MESSAGE: &str = "configured, awaiting content sync";

/// What a reconcile pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record does not exist
    Absent,
    /// Teardown finished and the finalizer was removed
    Finalized,
    /// Finalizer was added; pass stopped
    FinalizerAdded,
    /// Auth token was minted; pass stopped
    TokenMinted,
    /// Auth token could not be generated
    TokenFailed,
    /// Spec is invalid; waits for the record to change
    Invalid,
    /// Downstream resources applied
    Configured,
    /// Applying downstream resources failed
    Failed,
}

impl ReconcileOutcome {
    /// Delay before the next pass; `None` waits for the next change
    pub fn requeue_after(self) -> Option<Duration> {
        match self {
            ReconcileOutcome::Absent | ReconcileOutcome::Finalized | ReconcileOutcome::Invalid => None,
            ReconcileOutcome::FinalizerAdded | ReconcileOutcome::TokenMinted => Some(SHORT_REQUEUE),
            ReconcileOutcome::TokenFailed | ReconcileOutcome::Failed => Some(ERROR_REQUEUE),
            ReconcileOutcome::Configured => Some(RESYNC_INTERVAL),
        }
    }

    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileOutcome::Absent => "absent",
            ReconcileOutcome::Finalized => "finalized",
            ReconcileOutcome::FinalizerAdded => "finalizer_added",
            ReconcileOutcome::TokenMinted => "token_minted",
            ReconcileOutcome::TokenFailed => "token_failed",
            ReconcileOutcome::Invalid => "invalid",
            ReconcileOutcome::Configured => "configured",
            ReconcileOutcome::Failed => "failed",
        }
    }
}

/// Failure while applying one downstream kind
#[derive(Debug)]
pub(crate) struct ApplyError {
    kind: &'static str,
    source: StoreError,
}

impl ApplyError {
    pub(crate) fn new(kind: &'static str, source: StoreError) -> Self {
        Self { kind, source }
    }
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.source)
    }
}

/// Resources applied for a site
#[derive(Debug)]
struct AppliedSite {
    resources: GeneratedResources,
    certificate_condition: Condition,
}

/// Reconciles StaticSite records.
pub struct Reconciler {
    pub(crate) config: ReconcilerConfig,
    pub(crate) sites: Arc<dyn SiteStoreTrait>,
    pub(crate) middlewares: Arc<dyn ResourceClientTrait<Middleware>>,
    pub(crate) routes: Arc<dyn ResourceClientTrait<IngressRoute>>,
    pub(crate) certificates: Arc<dyn ResourceClientTrait<Certificate>>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) metrics: ReconcileMetrics,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler
    pub fn new(
        config: ReconcilerConfig,
        sites: Arc<dyn SiteStoreTrait>,
        middlewares: Arc<dyn ResourceClientTrait<Middleware>>,
        routes: Arc<dyn ResourceClientTrait<IngressRoute>>,
        certificates: Arc<dyn ResourceClientTrait<Certificate>>,
        events: Arc<dyn EventPublisher>,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self { config, sites, middlewares, routes, certificates, events, metrics }
    }

    /// Runs one pass for `namespace/name` and records the outcome metric
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let result = self.reconcile_site(namespace, name).await;
        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        self.metrics.reconciled(label);
        result
    }

    async fn reconcile_site(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let Some(site) = self.sites.get_site(namespace, name).await? else {
            debug!("StaticSite {}/{} not found, nothing to do", namespace, name);
            return Ok(ReconcileOutcome::Absent);
        };

        if site.is_being_deleted() {
            return self.finalize(&site).await;
        }

        if !site.has_finalizer() {
            self.sites.add_finalizer(&site).await?;
            info!("Added finalizer to StaticSite {}/{}", namespace, name);
            return Ok(ReconcileOutcome::FinalizerAdded);
        }

        if site.auth_token().is_none() {
            return self.mint_token(&site).await;
        }

        if let Err(e) = validate_site(&site) {
            warn!("StaticSite {}/{} is invalid: {}", namespace, name, e);
            self.record_invalid(&site, &e).await?;
            return Ok(ReconcileOutcome::Invalid);
        }

        let domain = site.effective_domain(&self.config.base_domain);
        match self.apply_site(&site, &domain).await {
            Ok(applied) => {
                self.record_configured(&site, &domain, applied).await?;
                Ok(ReconcileOutcome::Configured)
            }
            Err(e) => {
                error!("Failed to reconcile StaticSite {}/{}: {}", namespace, name, e);
                self.record_failure(&site, &e).await?;
                Ok(ReconcileOutcome::Failed)
            }
        }
    }

    /// Deletion path: remove exclusive resources, release the certificate
    /// if no other site uses it, then drop the finalizer.
    async fn finalize(&self, site: &StaticSite) -> Result<ReconcileOutcome, ControllerError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        if !site.has_finalizer() {
            debug!("StaticSite {}/{} is being deleted without our finalizer", namespace, name);
            return Ok(ReconcileOutcome::Absent);
        }

        info!("Tearing down StaticSite {}/{}", namespace, name);
        self.delete_routing(site).await?;

        let mut released: Vec<String> = Vec::new();
        let recorded = site.status.as_ref().and_then(|s| s.resources.as_ref()).and_then(|r| r.certificate.clone());
        for cert in certificate::certificate_for(site).into_iter().chain(recorded) {
            if !released.contains(&cert) {
                self.release_certificate(site, &cert).await;
                released.push(cert);
            }
        }

        self.sites.remove_finalizer(site).await?;
        info!("Removed finalizer from StaticSite {}/{}", namespace, name);
        Ok(ReconcileOutcome::Finalized)
    }

    async fn mint_token(&self, site: &StaticSite) -> Result<ReconcileOutcome, ControllerError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        match generate_token() {
            Ok(token) => {
                self.sites
                    .patch_status(namespace, name, serde_json::json!({ "authToken": token }))
                    .await?;
                info!("Issued auth token for StaticSite {}/{}", namespace, name);
                Ok(ReconcileOutcome::TokenMinted)
            }
            Err(e) => {
                error!("Failed to issue auth token for StaticSite {}/{}: {}", namespace, name, e);
                let conditions = merge_conditions(
                    site.status.as_ref(),
                    vec![Condition::new(CONDITION_READY, ConditionStatus::False, "TokenGenerationFailed", e.to_string())],
                    &now(),
                );
                let patch = error_status_patch(&e.to_string(), &conditions, site.metadata.generation);
                self.sites.patch_status(namespace, name, patch).await?;
                Ok(ReconcileOutcome::TokenFailed)
            }
        }
    }

    async fn apply_site(&self, site: &StaticSite, domain: &str) -> Result<AppliedSite, ApplyError> {
        let middleware = self.ensure_middleware(site).await?;

        let (certificate, tls_secret) = match site.custom_domain() {
            Some(_) => {
                let (cert, secret) = self.ensure_certificate(domain).await?;
                (Some(cert), secret)
            }
            None => (None, self.config.wildcard_tls_secret.clone()),
        };

        let ingress_route = self.ensure_ingress_route(site, domain, &middleware, &tls_secret).await?;

        let certificate_condition = match &certificate {
            Some(cert) => self.certificate_condition(cert).await,
            None => Condition::new(
                crds::CONDITION_CERTIFICATE_READY,
                ConditionStatus::True,
                "WildcardCertificate",
                format!("served with {}", self.config.wildcard_tls_secret),
            ),
        };

        Ok(AppliedSite {
            resources: GeneratedResources { middleware, ingress_route, certificate, tls_secret },
            certificate_condition,
        })
    }

    async fn record_configured(
        &self,
        site: &StaticSite,
        domain: &str,
        applied: AppliedSite,
    ) -> Result<(), ControllerError> {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
        let status = site.status.as_ref();

        // A certificate recorded by an earlier pass that no longer matches the
        // domain is released through the same reference count as on deletion.
        let previous = status.and_then(|s| s.resources.as_ref()).and_then(|r| r.certificate.clone());
        if let Some(previous) = previous.filter(|p| applied.resources.certificate.as_ref() != Some(p)) {
            info!("StaticSite {}/{} no longer uses Certificate {}", namespace, name, previous);
            self.release_certificate(site, &previous).await;
        }

        let synced = match status.and_then(|s| s.last_commit.as_deref()) {
            Some(commit) => Condition::new(CONDITION_SYNCED, ConditionStatus::True, "ContentSynced", format!("commit {commit}")),
            None => Condition::new(CONDITION_SYNCED, ConditionStatus::False, "AwaitingSync", "content not synced yet"),
        };
        let was_ready = status
            .and_then(|s| find_condition(&s.conditions, CONDITION_READY))
            .is_some_and(|c| c.status == ConditionStatus::True);

        let conditions = merge_conditions(
            status,
            vec![
                Condition::new(CONDITION_INGRESS_READY, ConditionStatus::True, "Applied", format!("routing {}", domain)),
                applied.certificate_condition,
                synced,
                Condition::new(CONDITION_READY, ConditionStatus::True, "Configured", "downstream resources applied"),
            ],
            &now(),
        );

        let url = site_url(domain, site.path_prefix());
        let mut patch =
            configured_status_patch(AWAITING_SYNC_MESSAGE, &url, &applied.resources, &conditions, site.metadata.generation);
        // Once configured, phase and message belong to the sync engine until
        // this controller reports a failure again.
        let pending = status.is_none_or(|s| s.phase == SitePhase::Pending);
        if was_ready && !pending {
            if let Some(map) = patch.as_object_mut() {
                map.remove("phase");
                map.remove("message");
            }
        }

        if status_needs_update(status, &patch) {
            self.sites.patch_status(namespace, name, patch).await?;
            info!("StaticSite {}/{} configured at {}", namespace, name, url);
        } else {
            debug!("StaticSite {}/{} status unchanged", namespace, name);
        }
        Ok(())
    }

    async fn record_invalid(&self, site: &StaticSite, message: &str) -> Result<(), ControllerError> {
        let conditions = merge_conditions(
            site.status.as_ref(),
            vec![Condition::new(CONDITION_READY, ConditionStatus::False, "InvalidSpec", message)],
            &now(),
        );
        let patch = error_status_patch(message, &conditions, site.metadata.generation);
        if status_needs_update(site.status.as_ref(), &patch) {
            self.sites
                .patch_status(site.namespace_or_default(), site.name_or_empty(), patch)
                .await?;
            self.publish(site, SiteEventType::Warning, "InvalidSpec", message).await;
        }
        Ok(())
    }

    async fn record_failure(&self, site: &StaticSite, err: &ApplyError) -> Result<(), ControllerError> {
        let message = err.to_string();
        let mut updates = vec![Condition::new(CONDITION_READY, ConditionStatus::False, "ReconcileFailed", message.clone())];
        if err.kind != certificate::CERTIFICATE_KIND {
            updates.push(Condition::new(CONDITION_INGRESS_READY, ConditionStatus::False, "ApplyFailed", message.clone()));
        }
        let conditions = merge_conditions(site.status.as_ref(), updates, &now());
        let patch = error_status_patch(&message, &conditions, site.metadata.generation);
        self.sites
            .patch_status(site.namespace_or_default(), site.name_or_empty(), patch)
            .await?;
        self.publish(site, SiteEventType::Warning, "ReconcileFailed", &message).await;
        Ok(())
    }

    pub(crate) async fn publish(&self, site: &StaticSite, event_type: SiteEventType, reason: &str, note: &str) {
        let event = SiteEvent { event_type, reason: reason.to_string(), note: note.to_string() };
        if let Err(e) = self.events.publish(site, event).await {
            warn!(
                "Failed to publish {} event for StaticSite {}/{}: {}",
                reason,
                site.namespace_or_default(),
                site.name_or_empty(),
                e
            );
        }
    }
}

/// Checks the parts of the spec the reconciler depends on
pub fn validate_site(site: &StaticSite) -> Result<(), String> {
    let Some(prefix) = site.path_prefix() else {
        return Ok(());
    };
    if site.custom_domain().is_none() {
        return Err("pathPrefix requires domain to be set".to_string());
    }
    if !prefix.starts_with('/') {
        return Err(format!("pathPrefix {prefix:?} must start with /"));
    }
    if prefix.trim_end_matches('/').is_empty() || prefix == ROOT_PATH {
        return Err("pathPrefix must not be /".to_string());
    }
    Ok(())
}

/// Externally visible URL of a site
pub fn site_url(domain: &str, path_prefix: Option<&str>) -> String {
    match path_prefix {
        Some(prefix) => format!("https://{}{}", domain, prefix.trim_end_matches('/')),
        None => format!("https://{}", domain),
    }
}

fn now() -> String {
    format_timestamp(chrono::Utc::now())
}

#[cfg(test)]
mod reconciler_test;

//! Helper functions for common reconciliation patterns
//!
//! Create-or-update of downstream resources and status patch construction
//! shared by the routing and certificate reconcilers.

use cluster_client::{DOMAIN_LABEL, EdgeResource, ResourceClientTrait, ResourceMeta, SITE_LABEL, StoreError, patch_changes};
use crds::{Condition, GeneratedResources, SitePhase, StaticSiteStatus, set_condition};
use tracing::{debug, info, warn};

/// Labels naming the site or domain an object was generated for
const OWNER_LABELS: [&str; 2] = [SITE_LABEL, DOMAIN_LABEL];

/// Owner recorded on `existing` when it differs from the one `desired` claims
fn foreign_owner<'a>(existing: &'a ResourceMeta, desired: &ResourceMeta) -> Option<&'a str> {
    OWNER_LABELS.iter().find_map(|label| {
        let theirs = existing.labels.get(*label)?;
        let ours = desired.labels.get(*label)?;
        (theirs != ours).then_some(theirs.as_str())
    })
}

/// Outcome of [`apply_resource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object did not exist and was created
    Created,
    /// Object existed with a different spec and was replaced
    Updated,
    /// Object already matched
    Unchanged,
}

/// Creates `desired` or brings the existing object in line with it.
///
/// The existing object is fetched first and its resourceVersion carried into
/// the update, so a concurrent writer surfaces as [`StoreError::Conflict`]
/// instead of a silent overwrite. An existing object generated for another
/// site or domain is never touched.
pub async fn apply_resource<R: EdgeResource>(
    client: &dyn ResourceClientTrait<R>,
    desired: R,
) -> Result<(R, ApplyOutcome), StoreError> {
    let Some(existing) = client.get(desired.name()).await? else {
        let created = client.create(&desired).await?;
        info!("Created {} {}", R::KIND, created.name());
        return Ok((created, ApplyOutcome::Created));
    };

    if let Some(owner) = foreign_owner(existing.meta(), desired.meta()) {
        warn!("Refusing to update {} {}: it belongs to {}", R::KIND, existing.name(), owner);
        return Err(StoreError::Owned(format!("{} {} belongs to {}", R::KIND, existing.name(), owner)));
    }

    if existing.data()? == desired.data()? && existing.meta().labels == desired.meta().labels {
        debug!("{} {} is up to date", R::KIND, existing.name());
        return Ok((existing, ApplyOutcome::Unchanged));
    }

    let mut replacement = desired;
    replacement.meta_mut().resource_version = existing.meta().resource_version.clone();
    let updated = client.update(&replacement).await?;
    info!("Updated {} {}", R::KIND, updated.name());
    Ok((updated, ApplyOutcome::Updated))
}

/// Deletes a resource, treating absence as success
pub async fn delete_resource<R: EdgeResource>(
    client: &dyn ResourceClientTrait<R>,
    name: &str,
) -> Result<(), StoreError> {
    if client.delete(name).await? {
        info!("Deleted {} {}", R::KIND, name);
    } else {
        debug!("{} {} already absent", R::KIND, name);
    }
    Ok(())
}

/// Deletes a site's exclusive resource unless another site owns it
pub async fn delete_owned_resource<R: EdgeResource>(
    client: &dyn ResourceClientTrait<R>,
    name: &str,
    owner: &str,
) -> Result<(), StoreError> {
    let foreign = client
        .get(name)
        .await?
        .and_then(|existing| existing.meta().labels.get(SITE_LABEL).filter(|o| o.as_str() != owner).cloned());
    if let Some(other) = foreign {
        warn!("Not deleting {} {}: it belongs to {}", R::KIND, name, other);
        return Ok(());
    }
    delete_resource(client, name).await
}

/// Merges `updates` into the current conditions, keeping transition times
pub fn merge_conditions(current: Option<&StaticSiteStatus>, updates: Vec<Condition>, now: &str) -> Vec<Condition> {
    let mut conditions = current.map(|s| s.conditions.clone()).unwrap_or_default();
    for condition in updates {
        set_condition(&mut conditions, condition, now);
    }
    conditions
}

/// Status patch written after a successful pass
pub fn configured_status_patch(
    message: &str,
    url: &str,
    resources: &GeneratedResources,
    conditions: &[Condition],
    observed_generation: Option<i64>,
) -> serde_json::Value {
    serde_json::json!({
        "phase": SitePhase::Ready.as_str(),
        "message": message,
        "url": url,
        "resources": {
            "middleware": resources.middleware,
            "ingressRoute": resources.ingress_route,
            "certificate": resources.certificate,
            "tlsSecret": resources.tls_secret,
        },
        "conditions": conditions,
        "observedGeneration": observed_generation,
    })
}

/// Status patch written when a pass fails or the record is invalid
pub fn error_status_patch(
    message: &str,
    conditions: &[Condition],
    observed_generation: Option<i64>,
) -> serde_json::Value {
    serde_json::json!({
        "phase": SitePhase::Error.as_str(),
        "message": message,
        "conditions": conditions,
        "observedGeneration": observed_generation,
    })
}

/// Whether applying `patch` would change the stored status.
///
/// Skipping no-op patches keeps the reconciler from re-triggering itself
/// through its own status writes.
pub fn status_needs_update(current: Option<&StaticSiteStatus>, patch: &serde_json::Value) -> bool {
    let Some(current) = current else {
        return true;
    };
    match serde_json::to_value(current) {
        Ok(current) => patch_changes(&current, patch),
        Err(_) => true,
    }
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;

//! Shared Certificate lifecycle
//!
//! One Certificate exists per distinct custom domain and is shared by every
//! site on that domain, whatever their path prefixes. Owner references cannot
//! express that, so the certificate is reference counted: it is deleted only
//! when no other live site still resolves to it.

use super::{ApplyError, Reconciler};
use crate::reconcile_helpers::{apply_resource, delete_resource};
use cluster_client::{Certificate, DOMAIN_LABEL, ResourceMeta, SiteEventType, StoreError, build_certificate};
use crds::naming::{certificate_name, certificate_secret_name};
use crds::{CONDITION_CERTIFICATE_READY, Condition, ConditionStatus, StaticSite};
use tracing::{debug, info, warn};

pub(crate) const CERTIFICATE_KIND: &str = "Certificate";

/// Name of the certificate a site needs, `None` for sites on the wildcard domain
pub fn certificate_for(site: &StaticSite) -> Option<String> {
    site.custom_domain().map(|domain| certificate_name(&domain.to_ascii_lowercase()))
}

/// Maps the result of fetching a certificate to the `CertificateReady` condition
pub fn certificate_ready_condition(fetched: Result<Option<Certificate>, StoreError>) -> Condition {
    let unknown = |reason: &str, message: String| {
        Condition::new(CONDITION_CERTIFICATE_READY, ConditionStatus::Unknown, reason, message)
    };

    let cert = match fetched {
        Ok(Some(cert)) => cert,
        Ok(None) => {
            return Condition::new(
                CONDITION_CERTIFICATE_READY,
                ConditionStatus::False,
                "CertificateNotFound",
                "certificate does not exist",
            );
        }
        Err(e) => return unknown("CertificateFetchError", e.to_string()),
    };

    let Some(status) = cert.status else {
        return unknown("StatusNotAvailable", "certificate has no status yet".to_string());
    };
    let Some(conditions) = status.conditions.filter(|c| !c.is_empty()) else {
        return unknown("ConditionsNotAvailable", "certificate status has no conditions".to_string());
    };
    let Some(ready) = conditions.into_iter().find(|c| c.type_ == "Ready") else {
        return unknown("ReadyConditionNotFound", "certificate has no Ready condition".to_string());
    };

    Condition::new(
        CONDITION_CERTIFICATE_READY,
        ConditionStatus::parse(&ready.status),
        ready.reason.unwrap_or_default(),
        ready.message.unwrap_or_default(),
    )
}

impl Reconciler {
    /// Applies the shared certificate for `domain`, returning `(name, secret)`
    pub(crate) async fn ensure_certificate(&self, domain: &str) -> Result<(String, String), ApplyError> {
        let name = certificate_name(domain);
        let secret = certificate_secret_name(domain);
        let meta = ResourceMeta::managed(name.clone()).with_label(DOMAIN_LABEL, name.clone());
        let desired = build_certificate(meta, domain, &secret, &self.config.cluster_issuer);
        apply_resource(self.certificates.as_ref(), desired)
            .await
            .map_err(|e| ApplyError::new(CERTIFICATE_KIND, e))?;
        Ok((name, secret))
    }

    /// Reads the certificate back and derives `CertificateReady`
    pub(crate) async fn certificate_condition(&self, name: &str) -> Condition {
        certificate_ready_condition(self.certificates.get(name).await)
    }

    /// Deletes `cert` unless another live site still needs it.
    ///
    /// Best effort: failures are logged and never block the caller.
    pub(crate) async fn release_certificate(&self, site: &StaticSite, cert: &str) {
        let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());

        // Without a complete view of the siblings the certificate is kept.
        let sites = match self.sites.list_sites().await {
            Ok(sites) => sites,
            Err(e) => {
                warn!("Cannot count users of Certificate {} ({}), keeping it", cert, e);
                return;
            }
        };

        let holders: Vec<String> = sites
            .iter()
            .filter(|other| !(other.namespace_or_default() == namespace && other.name_or_empty() == name))
            .filter(|other| !other.is_being_deleted())
            .filter(|other| certificate_for(other).as_deref() == Some(cert))
            .map(|other| format!("{}/{}", other.namespace_or_default(), other.name_or_empty()))
            .collect();

        if !holders.is_empty() {
            debug!("Certificate {} still used by {}", cert, holders.join(", "));
            return;
        }

        match delete_resource(self.certificates.as_ref(), cert).await {
            Ok(()) => {
                info!("Released Certificate {} (last user was {}/{})", cert, namespace, name);
                self.publish(site, SiteEventType::Normal, "CertificateReleased", &format!("deleted Certificate {cert}"))
                    .await;
            }
            Err(e) => warn!("Failed to delete Certificate {}: {}", cert, e),
        }
    }
}

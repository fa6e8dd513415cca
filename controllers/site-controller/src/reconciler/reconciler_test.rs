//! Unit tests for the StaticSite reconciler

use super::*;
use crate::test_utils::*;
use cluster_client::{CertificateCondition, CertificateStatus};
use crds::CONDITION_CERTIFICATE_READY;
use crds::naming::site_name;

#[tokio::test]
async fn test_absent_record_is_noop() {
    let h = TestHarness::new();
    assert_eq!(h.reconcile("team-a", "missing").await, ReconcileOutcome::Absent);
    assert!(h.store.status_patches().is_empty());
}

#[tokio::test]
async fn test_resources_created_on_third_pass() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));

    assert_eq!(h.reconcile("team-a", "blog").await, ReconcileOutcome::FinalizerAdded);
    assert!(h.store.site("team-a", "blog").unwrap().has_finalizer());
    assert!(h.routes.names().is_empty());

    assert_eq!(h.reconcile("team-a", "blog").await, ReconcileOutcome::TokenMinted);
    assert!(h.store.site("team-a", "blog").unwrap().auth_token().is_some());
    assert!(h.routes.names().is_empty());
    assert!(h.middlewares.names().is_empty());

    assert_eq!(h.reconcile("team-a", "blog").await, ReconcileOutcome::Configured);
    assert_eq!(h.routes.names(), vec!["team-a-blog".to_string()]);
    assert_eq!(h.middlewares.names(), vec!["team-a-blog-rewrite".to_string()]);
    assert!(h.certificates.names().is_empty());

    let status = h.store.status("team-a", "blog").unwrap();
    assert_eq!(status.phase, SitePhase::Ready);
    assert_eq!(status.message.as_deref(), Some(AWAITING_SYNC_MESSAGE));
    assert_eq!(status.url.as_deref(), Some("https://blog.sites.example.com"));
    assert_eq!(status.observed_generation, Some(1));

    let route = h.routes.object("team-a-blog").unwrap();
    assert_eq!(route.spec.routes[0].match_rule, "Host(`blog.sites.example.com`)");
    assert_eq!(route.spec.tls.unwrap().secret_name, "wildcard-tls");

    let mw = h.middlewares.object("team-a-blog-rewrite").unwrap();
    assert_eq!(mw.spec.add_prefix.unwrap().prefix, "/team-a-blog");
}

#[tokio::test]
async fn test_token_is_never_regenerated() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));
    assert_eq!(h.configure("team-a", "blog").await, ReconcileOutcome::Configured);
    let token = h.store.site("team-a", "blog").unwrap().auth_token().unwrap().to_string();

    for _ in 0..3 {
        assert_eq!(h.reconcile("team-a", "blog").await, ReconcileOutcome::Configured);
    }
    let after = h.store.site("team-a", "blog").unwrap();
    assert_eq!(after.auth_token(), Some(token.as_str()));
}

#[tokio::test]
async fn test_steady_state_writes_no_status() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));
    h.configure("team-a", "blog").await;
    let patches = h.store.status_patches().len();

    assert_eq!(h.reconcile("team-a", "blog").await, ReconcileOutcome::Configured);
    assert_eq!(h.store.status_patches().len(), patches);
}

#[tokio::test]
async fn test_path_prefix_without_domain_is_invalid() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, Some("/docs")));

    assert_eq!(h.configure("team-a", "blog").await, ReconcileOutcome::Invalid);
    assert_eq!(ReconcileOutcome::Invalid.requeue_after(), None);

    let status = h.store.status("team-a", "blog").unwrap();
    assert_eq!(status.phase, SitePhase::Error);
    assert!(status.message.unwrap().contains("requires domain"));
    assert!(h.routes.names().is_empty());
    assert!(h.middlewares.names().is_empty());
    assert_eq!(h.events.events()[0].1.reason, "InvalidSpec");
}

#[tokio::test]
async fn test_root_path_prefix_is_invalid() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", Some("docs.example.com"), Some("/")));
    assert_eq!(h.configure("team-a", "blog").await, ReconcileOutcome::Invalid);
    assert!(h.certificates.names().is_empty());
}

#[tokio::test]
async fn test_custom_domain_with_prefix() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "docs", Some("Docs.Example.com"), Some("/2019/")));
    assert_eq!(h.configure("team-a", "docs").await, ReconcileOutcome::Configured);

    let route = h.routes.object("team-a-docs").unwrap();
    assert_eq!(route.spec.routes[0].match_rule, "Host(`docs.example.com`) && PathRegexp(`^/2019(/|$)`)");
    assert_eq!(route.spec.tls.unwrap().secret_name, "docs-example-com-tls");

    let cert = h.certificates.object("docs-example-com").unwrap();
    assert_eq!(cert.spec.dns_names, vec!["docs.example.com".to_string()]);
    assert_eq!(cert.spec.issuer_ref.name, "letsencrypt-prod");

    let status = h.store.status("team-a", "docs").unwrap();
    assert_eq!(status.url.as_deref(), Some("https://docs.example.com/2019"));
    let resources = status.resources.unwrap();
    assert_eq!(resources.certificate.as_deref(), Some("docs-example-com"));

    // Fresh certificate without status from cert-manager yet
    let cert_ready = find_condition(&status.conditions, CONDITION_CERTIFICATE_READY).unwrap();
    assert_eq!(cert_ready.status, ConditionStatus::Unknown);
    assert_eq!(cert_ready.reason.as_deref(), Some("StatusNotAvailable"));
}

#[tokio::test]
async fn test_certificate_ready_is_mirrored_into_status() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "docs", Some("docs.example.com"), None));
    h.configure("team-a", "docs").await;

    let mut cert = h.certificates.object("docs-example-com").unwrap();
    cert.status = Some(CertificateStatus {
        conditions: Some(vec![CertificateCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            reason: Some("Ready".to_string()),
            message: Some("Certificate is up to date and has not expired".to_string()),
        }]),
    });
    h.certificates.insert(cert);

    h.reconcile("team-a", "docs").await;
    let status = h.store.status("team-a", "docs").unwrap();
    let cert_ready = find_condition(&status.conditions, CONDITION_CERTIFICATE_READY).unwrap();
    assert_eq!(cert_ready.status, ConditionStatus::True);
    assert_eq!(cert_ready.reason.as_deref(), Some("Ready"));
}

#[tokio::test]
async fn test_shared_certificate_reference_counting() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "docs-2019", Some("docs.example.com"), Some("/2019")));
    h.store.add_site(create_test_site("team-b", "docs-2020", Some("docs.example.com"), Some("/2020")));
    assert_eq!(h.configure("team-a", "docs-2019").await, ReconcileOutcome::Configured);
    assert_eq!(h.configure("team-b", "docs-2020").await, ReconcileOutcome::Configured);

    assert_eq!(h.certificates.names(), vec!["docs-example-com".to_string()]);
    assert_eq!(h.routes.names().len(), 2);

    // First deletion: the other site still uses the certificate
    h.store.request_deletion("team-a", "docs-2019");
    assert_eq!(h.reconcile("team-a", "docs-2019").await, ReconcileOutcome::Finalized);
    assert!(h.store.site("team-a", "docs-2019").is_none());
    assert_eq!(h.certificates.names(), vec!["docs-example-com".to_string()]);
    assert_eq!(h.routes.names(), vec![site_name("team-b", "docs-2020")]);

    // Last user gone: certificate deleted
    h.store.request_deletion("team-b", "docs-2020");
    assert_eq!(h.reconcile("team-b", "docs-2020").await, ReconcileOutcome::Finalized);
    assert!(h.certificates.names().is_empty());
    assert!(h.routes.names().is_empty());
    assert!(h.middlewares.names().is_empty());
    assert!(h.events.events().iter().any(|(_, e)| e.reason == "CertificateReleased"));
}

#[tokio::test]
async fn test_colliding_identities_get_separate_routing() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));
    h.store.add_site(create_test_site("team", "a-blog", None, None));
    assert_eq!(h.configure("team-a", "blog").await, ReconcileOutcome::Configured);
    assert_eq!(h.configure("team", "a-blog").await, ReconcileOutcome::Configured);

    assert_eq!(h.routes.names().len(), 2);
    assert_eq!(h.middlewares.names().len(), 2);
    let route = h.routes.object("team-a-blog").unwrap();
    assert_eq!(route.spec.routes[0].match_rule, "Host(`blog.sites.example.com`)");

    h.store.request_deletion("team", "a-blog");
    assert_eq!(h.reconcile("team", "a-blog").await, ReconcileOutcome::Finalized);
    assert_eq!(h.routes.names(), vec!["team-a-blog".to_string()]);
    assert_eq!(h.middlewares.names(), vec!["team-a-blog-rewrite".to_string()]);
}

#[tokio::test]
async fn test_certificate_delete_failure_does_not_block_finalizer() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "docs", Some("docs.example.com"), None));
    h.configure("team-a", "docs").await;

    h.certificates.set_fail_writes(true);
    h.store.request_deletion("team-a", "docs");
    assert_eq!(h.reconcile("team-a", "docs").await, ReconcileOutcome::Finalized);
    assert!(h.store.site("team-a", "docs").is_none());
    assert_eq!(h.certificates.names(), vec!["docs-example-com".to_string()]);
}

#[tokio::test]
async fn test_domain_change_releases_old_certificate() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "docs", Some("old.example.com"), None));
    h.configure("team-a", "docs").await;
    assert_eq!(h.certificates.names(), vec!["old-example-com".to_string()]);

    let mut site = h.store.site("team-a", "docs").unwrap();
    site.spec.domain = Some("new.example.com".to_string());
    site.metadata.generation = Some(2);
    h.store.add_site(site);

    assert_eq!(h.reconcile("team-a", "docs").await, ReconcileOutcome::Configured);
    assert_eq!(h.certificates.names(), vec!["new-example-com".to_string()]);
    let status = h.store.status("team-a", "docs").unwrap();
    assert_eq!(status.resources.unwrap().certificate.as_deref(), Some("new-example-com"));
    assert_eq!(status.observed_generation, Some(2));
}

#[tokio::test]
async fn test_apply_failure_sets_error_and_warning_event() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));
    h.routes.set_fail_writes(true);

    let outcome = h.configure("team-a", "blog").await;
    assert_eq!(outcome, ReconcileOutcome::Failed);
    assert_eq!(outcome.requeue_after(), Some(ERROR_REQUEUE));

    let status = h.store.status("team-a", "blog").unwrap();
    assert_eq!(status.phase, SitePhase::Error);
    assert!(status.message.unwrap().starts_with("IngressRoute:"));
    let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "team-a/blog");
    assert_eq!(events[0].1.event_type, SiteEventType::Warning);

    // Recovery flips the site back to Ready
    h.routes.set_fail_writes(false);
    assert_eq!(h.reconcile("team-a", "blog").await, ReconcileOutcome::Configured);
    assert_eq!(h.store.status("team-a", "blog").unwrap().phase, SitePhase::Ready);
}

#[tokio::test]
async fn test_sync_owned_phase_is_left_alone() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));
    h.configure("team-a", "blog").await;

    h.store
        .patch_status(
            "team-a",
            "blog",
            serde_json::json!({"phase": "Syncing", "message": "syncing", "lastCommit": "abc1234"}),
        )
        .await
        .unwrap();
    h.reconcile("team-a", "blog").await;

    let status = h.store.status("team-a", "blog").unwrap();
    assert_eq!(status.phase, SitePhase::Syncing);
    assert_eq!(status.message.as_deref(), Some("syncing"));
    let synced = find_condition(&status.conditions, CONDITION_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::True);
}

#[tokio::test]
async fn test_outcomes_are_counted() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", None, None));
    h.configure("team-a", "blog").await;
    assert_eq!(h.reconciler.metrics.count("configured"), 1);
    assert_eq!(h.reconciler.metrics.count("finalizer_added"), 1);
}

#[test]
fn test_validate_and_url() {
    let site = create_test_site("team-a", "docs", Some("docs.example.com"), Some("2019"));
    assert!(validate_site(&site).unwrap_err().contains("must start with /"));
    let site = create_test_site("team-a", "docs", Some("docs.example.com"), Some("/2019"));
    assert!(validate_site(&site).is_ok());

    assert_eq!(site_url("a.example.com", Some("/x/")), "https://a.example.com/x");
    assert_eq!(site_url("a.example.com", None), "https://a.example.com");
}

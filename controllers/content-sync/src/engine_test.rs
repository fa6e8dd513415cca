use super::*;
use crate::test_utils::{FAKE_COMMIT, FakeFetcher, TestHarness, create_test_site};
use cluster_client::MockSiteStore;
use crds::SecretRef;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

fn is_symlink(path: &std::path::Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

#[tokio::test]
async fn test_direct_clone_serves_repository_root() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", "/"));

    let commit = h.engine.sync_site("team-a", "blog", SyncTrigger::Manual).await.unwrap();
    assert_eq!(commit, FAKE_COMMIT);

    let serving = h.layout.serving_path("team-a-blog");
    assert!(serving.join("index.html").is_file());
    assert!(!is_symlink(&serving));
    assert!(!h.layout.cache_path("team-a-blog").exists());

    let status = h.store.status("team-a", "blog").unwrap();
    assert_eq!(status.phase, SitePhase::Ready);
    assert_eq!(status.last_commit.as_deref(), Some(FAKE_COMMIT));
    assert!(status.last_sync.is_some());
    assert_eq!(status.message.as_deref(), Some("synced commit abc1234"));
    // fields owned by the site controller survive the merge patch
    assert_eq!(status.auth_token.as_deref(), Some("token-blog"));
}

#[tokio::test]
async fn test_subpath_is_served_through_symlink() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", "/dist"));

    h.engine.sync_site("team-a", "blog", SyncTrigger::Manual).await.unwrap();

    let serving = h.layout.serving_path("team-a-blog");
    assert!(is_symlink(&serving));
    assert_eq!(
        fs::read_link(&serving).unwrap(),
        h.root().join(".repos").join("team-a-blog").join("dist")
    );
    assert!(serving.join("index.html").is_file());

    let (request, dest) = &h.fetcher.calls()[0];
    assert_eq!(dest, &h.layout.cache_path("team-a-blog"));
    assert_eq!(request.branch, "main");
    assert!(request.credentials.is_none());
}

#[tokio::test]
async fn test_missing_subpath_fails_without_partial_state() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", "/public"));

    let err = h.engine.sync_site("team-a", "blog", SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidSubpath(_)));

    assert!(fs::symlink_metadata(h.layout.serving_path("team-a-blog")).is_err());
    assert!(!h.layout.cache_path("team-a-blog").exists());

    let status = h.store.status("team-a", "blog").unwrap();
    assert_eq!(status.phase, SitePhase::Error);
    assert!(status.message.unwrap().contains("/public"));
    assert!(status.last_commit.is_none());
    assert_eq!(h.engine.metrics().sync_count("manual", "rejected"), 1);
}

#[tokio::test]
async fn test_disallowed_host_never_reaches_git() {
    let h = TestHarness::new();
    let mut site = create_test_site("team-a", "blog", "/");
    site.spec.repo = "https://169.254.169.254/latest/meta-data".to_string();
    h.store.add_site(site);

    let err = h.engine.sync_site("team-a", "blog", SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::RepoNotAllowed(_)));
    assert!(h.fetcher.calls().is_empty());
    assert!(!h.layout.serving_path("team-a-blog").exists());
    assert_eq!(h.store.status("team-a", "blog").unwrap().phase, SitePhase::Error);
}

#[tokio::test]
async fn test_full_pass_isolates_failures() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "a-ok", "/"));

    let mut bad_host = create_test_site("ns", "b-bad-host", "/");
    bad_host.spec.repo = "https://git.other.com/x.git".to_string();
    h.store.add_site(bad_host);

    let mut unreachable = create_test_site("ns", "c-unreachable", "/");
    unreachable.spec.repo = "https://git.example.com/broken.git".to_string();
    h.store.add_site(unreachable);
    h.fetcher.fail_for("https://git.example.com/broken.git");

    h.store.add_site(create_test_site("ns", "d-ok", "/dist"));

    let report = h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 2);
    assert!(!report.cancelled);

    assert_eq!(h.store.status("ns", "a-ok").unwrap().phase, SitePhase::Ready);
    assert_eq!(h.store.status("ns", "b-bad-host").unwrap().phase, SitePhase::Error);
    assert_eq!(h.store.status("ns", "c-unreachable").unwrap().phase, SitePhase::Error);
    assert_eq!(h.store.status("ns", "d-ok").unwrap().phase, SitePhase::Ready);

    let metrics = h.engine.metrics();
    assert_eq!(metrics.sync_count("periodic", "success"), 2);
    assert_eq!(metrics.sync_count("periodic", "rejected"), 1);
    assert_eq!(metrics.sync_count("periodic", "failed"), 1);
}

#[tokio::test]
async fn test_cleanup_removes_unknown_entries() {
    let h = TestHarness::new();
    for entry in ["a", "b", ".repos/a", ".repos/c"] {
        fs::create_dir_all(h.root().join(entry)).unwrap();
    }

    let known: HashSet<String> = ["a".to_string()].into();
    let removed = h.engine.cleanup(&known).await.unwrap();
    assert_eq!(removed, 2);

    let mut left: Vec<String> = Vec::new();
    for dir in [h.root().to_path_buf(), h.root().join(".repos")] {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            left.push(path.strip_prefix(h.root()).unwrap().to_string_lossy().into_owned());
        }
    }
    left.sort();
    assert_eq!(left, vec![".repos", ".repos/a", "a"]);
    assert_eq!(h.engine.metrics().removed_count(), 2);
}

#[tokio::test]
async fn test_full_pass_cleans_up_deleted_sites() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "keep", "/"));
    h.store.add_site(create_test_site("ns", "gone", "/dist"));
    h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert!(h.layout.cache_path("ns-gone").exists());

    h.store.remove_site("ns", "gone");
    let report = h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.removed, 2);
    assert!(fs::symlink_metadata(h.layout.serving_path("ns-gone")).is_err());
    assert!(!h.layout.cache_path("ns-gone").exists());
    assert!(h.layout.serving_path("ns-keep").join("index.html").is_file());
}

#[tokio::test]
async fn test_sites_being_deleted_are_not_synced() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/"));
    h.store.request_deletion("ns", "blog");

    let report = h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_list_failure_aborts_pass_before_cleanup() {
    let h = TestHarness::new();
    fs::create_dir_all(h.root().join("ns-blog")).unwrap();
    h.store.set_fail_list(true);

    assert!(h.engine.sync_all(&CancellationToken::new()).await.is_err());
    assert!(h.root().join("ns-blog").exists());
}

#[tokio::test]
async fn test_cancelled_pass_stops_cleanly() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/"));
    fs::create_dir_all(h.root().join("orphan")).unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let report = h.engine.sync_all(&token).await.unwrap();
    assert!(report.cancelled);
    assert!(h.fetcher.calls().is_empty());
    assert!(h.root().join("orphan").exists());
}

#[tokio::test]
async fn test_sync_interval_hint_applies_to_periodic_pass_only() {
    let h = TestHarness::new();
    let mut site = create_test_site("ns", "blog", "/");
    site.spec.sync_interval = Some("1h".to_string());
    h.store.add_site(site);

    // first pass: never synced
    h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.fetcher.calls().len(), 1);

    let report = h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.fetcher.calls().len(), 1);

    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();
    assert_eq!(h.fetcher.calls().len(), 2);
}

#[test]
fn test_is_due() {
    let now = Utc::now();
    let mut site = create_test_site("ns", "blog", "/");
    assert!(is_due(&site, now));

    site.spec.sync_interval = Some("10m".to_string());
    assert!(is_due(&site, now), "never synced");

    let status = site.status.as_mut().unwrap();
    status.phase = SitePhase::Ready;
    status.last_sync = Some(format_timestamp(now - chrono::Duration::minutes(5)));
    assert!(!is_due(&site, now));
    assert!(is_due(&site, now + chrono::Duration::minutes(6)));

    site.status.as_mut().unwrap().phase = SitePhase::Error;
    assert!(is_due(&site, now), "failed sites retry every pass");

    site.status.as_mut().unwrap().phase = SitePhase::Ready;
    site.spec.sync_interval = Some("often".to_string());
    assert!(is_due(&site, now));
}

#[tokio::test]
async fn test_credentials_from_secret() {
    let h = TestHarness::new();
    let mut site = create_test_site("ns", "private", "/");
    site.spec.secret_ref = Some(SecretRef {
        name: "git-creds".to_string(),
        key: "token".to_string(),
        username_key: None,
    });
    h.store.add_secret(
        "ns",
        "git-creds",
        BTreeMap::from([("token".to_string(), "ghp_secret".to_string())]),
    );

    let credentials = h.engine.resolve_credentials(&site).await.unwrap().unwrap();
    assert_eq!(credentials.username, "git");
    assert_eq!(credentials.password, "ghp_secret");

    site.spec.secret_ref = Some(SecretRef {
        name: "git-creds".to_string(),
        key: String::new(),
        username_key: Some("user".to_string()),
    });
    h.store.add_secret(
        "ns",
        "git-creds",
        BTreeMap::from([
            ("password".to_string(), "pw".to_string()),
            ("user".to_string(), "deploy-bot".to_string()),
        ]),
    );
    let credentials = h.engine.resolve_credentials(&site).await.unwrap().unwrap();
    assert_eq!(credentials.username, "deploy-bot");
    assert_eq!(credentials.password, "pw");

    site.spec.secret_ref = None;
    assert!(h.engine.resolve_credentials(&site).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_secret_fails_before_fetch() {
    let h = TestHarness::new();
    let mut site = create_test_site("ns", "private", "/");
    site.spec.secret_ref = Some(SecretRef {
        name: "absent".to_string(),
        key: "password".to_string(),
        username_key: None,
    });
    h.store.add_site(site);

    let err = h.engine.sync_site("ns", "private", SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::Credentials(_)));
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.store.status("ns", "private").unwrap().phase, SitePhase::Error);
}

#[tokio::test]
async fn test_status_patch_failure_is_not_a_sync_failure() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/"));
    h.store.set_fail_status_patches(true);

    assert!(h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.is_ok());
    assert!(h.layout.serving_path("ns-blog").join("index.html").is_file());
}

#[tokio::test]
async fn test_first_sync_reports_syncing_phase() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/"));
    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();
    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();

    let phases: Vec<String> = h
        .store
        .status_patches()
        .into_iter()
        .filter_map(|(_, patch)| patch["phase"].as_str().map(str::to_string))
        .collect();
    assert_eq!(phases, vec!["Syncing", "Ready", "Ready"]);
}

#[tokio::test]
async fn test_unknown_site_is_not_found() {
    let h = TestHarness::new();
    let err = h.engine.sync_site("ns", "missing", SyncTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SyncError::SiteNotFound(_)));
}

#[tokio::test]
async fn test_sync_matching_selects_repo_and_branch() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "main-site", "/"));

    let mut preview = create_test_site("ns", "preview", "/");
    preview.spec.branch = "preview".to_string();
    h.store.add_site(preview);

    let mut other = create_test_site("ns", "other", "/");
    other.spec.repo = "https://git.example.com/team/other.git".to_string();
    h.store.add_site(other);

    let report = h
        .engine
        .sync_matching(&["https://GIT.example.com/team/site".to_string()], "main")
        .await
        .unwrap();
    assert_eq!(report, DispatchReport { matched: 1, synced: 1, failed: 0 });
    assert!(h.layout.serving_path(&site_name("ns", "main-site")).exists());
    assert!(!h.layout.serving_path("ns-preview").exists());
    assert!(!h.layout.serving_path("ns-other").exists());
    assert_eq!(h.engine.metrics().sync_count("webhook", "success"), 1);
}

#[tokio::test]
async fn test_switching_to_subpath_and_back() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/"));
    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();

    h.store.add_site(create_test_site("ns", "blog", "/dist"));
    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();
    assert!(is_symlink(&h.layout.serving_path("ns-blog")));
    assert!(!h.layout.serving_path("ns-blog").join(".git").exists());

    h.store.add_site(create_test_site("ns", "blog", "/"));
    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();
    assert!(!is_symlink(&h.layout.serving_path("ns-blog")));
    assert!(!h.layout.cache_path("ns-blog").exists());
}

#[tokio::test]
async fn test_delete_site_tolerates_absence() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/dist"));
    h.engine.sync_site("ns", "blog", SyncTrigger::Manual).await.unwrap();

    assert_eq!(h.engine.delete_site("ns", "blog").await.unwrap(), 2);
    assert!(fs::symlink_metadata(h.layout.serving_path("ns-blog")).is_err());
    assert!(!h.layout.cache_path("ns-blog").exists());
    assert_eq!(h.engine.delete_site("ns", "blog").await.unwrap(), 0);
}

#[tokio::test]
async fn test_colliding_identities_keep_separate_content() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("team-a", "blog", "/"));
    h.store.add_site(create_test_site("team", "a-blog", "/dist"));
    h.engine.sync_site("team-a", "blog", SyncTrigger::Manual).await.unwrap();
    h.engine.sync_site("team", "a-blog", SyncTrigger::Manual).await.unwrap();

    let first = h.layout.serving_path(&site_name("team-a", "blog"));
    let second = h.layout.serving_path(&site_name("team", "a-blog"));
    assert_ne!(first, second);
    assert!(!is_symlink(&first));
    assert!(first.join("index.html").is_file());
    assert!(is_symlink(&second));
    assert!(second.join("index.html").is_file());
}

#[tokio::test]
async fn test_deleting_site_is_not_resynced() {
    let h = TestHarness::new();
    h.store.add_site(create_test_site("ns", "blog", "/"));
    h.store.request_deletion("ns", "blog");
    let site = h.engine.get_site("ns", "blog").await.unwrap().unwrap();

    let result = h.engine.sync_record(&site, SyncTrigger::Manual).await;
    assert!(matches!(result, Err(SyncError::SiteDeleting(_))));
    assert!(h.fetcher.calls().is_empty());
    assert!(h.store.status_patches().is_empty());
    assert!(fs::symlink_metadata(h.layout.serving_path("ns-blog")).is_err());
}

/// Stands in for a webhook that creates and syncs another site while the
/// periodic pass is still busy
struct LateArrival {
    inner: FakeFetcher,
    store: MockSiteStore,
    layout: ContentLayout,
}

#[async_trait::async_trait]
impl RepoFetcher for LateArrival {
    async fn fetch(&self, request: FetchRequest, dest: PathBuf) -> Result<String, SyncError> {
        let commit = self.inner.fetch(request, dest).await?;
        self.store.add_site(create_test_site("ns", "late", "/"));
        let serving = self.layout.serving_path(&site_name("ns", "late"));
        fs::create_dir_all(serving.join(".git"))?;
        fs::write(serving.join("index.html"), "late")?;
        Ok(commit)
    }
}

#[tokio::test]
async fn test_site_created_during_pass_keeps_its_content() {
    let h = TestHarness::wrapping_fetcher(|fetcher, store, layout| {
        Arc::new(LateArrival {
            inner: fetcher,
            store: store.clone(),
            layout: layout.clone(),
        })
    });
    h.store.add_site(create_test_site("ns", "early", "/"));

    let report = h.engine.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.removed, 0);
    assert!(h.layout.serving_path("ns-late").join("index.html").is_file());
    assert!(h.layout.serving_path("ns-early").join("index.html").is_file());
}

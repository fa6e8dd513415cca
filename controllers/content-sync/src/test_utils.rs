//! Test utilities for the sync engine and the HTTP front end
//!
//! A fake fetcher that materializes a fixed file set instead of talking to a
//! Git server, plus an engine wired to it and to an in-memory record store.

use crate::engine::{SyncEngine, SyncSettings};
use crate::error::SyncError;
use crate::git::{FetchRequest, RepoFetcher};
use crate::layout::ContentLayout;
use crate::metrics::SyncMetrics;
use crate::validate::HostAllowlist;
use cluster_client::MockSiteStore;
use crds::{StaticSite, StaticSiteSpec, StaticSiteStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Commit hash reported by [`FakeFetcher`]
pub const FAKE_COMMIT: &str = "abc1234";

/// Repository URL used by [`create_test_site`]
pub const TEST_REPO: &str = "https://git.example.com/team/site.git";

/// Fetcher that writes `files` and a `.git` marker into the checkout
#[derive(Clone)]
pub struct FakeFetcher {
    files: Vec<String>,
    calls: Arc<Mutex<Vec<(FetchRequest, PathBuf)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FakeFetcher {
    /// Fetcher whose "repository" holds `files`
    pub fn with_files(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|f| (*f).to_string()).collect(),
            calls: Arc::default(),
            failing: Arc::default(),
        }
    }

    /// Makes fetches of `url` fail like an unreachable host
    pub fn fail_for(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Every fetch request received, in order
    pub fn calls(&self) -> Vec<(FetchRequest, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RepoFetcher for FakeFetcher {
    async fn fetch(&self, request: FetchRequest, dest: PathBuf) -> Result<String, SyncError> {
        self.calls.lock().unwrap().push((request.clone(), dest.clone()));
        if self.failing.lock().unwrap().contains(&request.url) {
            return Err(SyncError::Git(git2::Error::from_str("failed to resolve address")));
        }
        std::fs::create_dir_all(dest.join(".git"))?;
        for file in &self.files {
            let path = dest.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, format!("{} at {}", file, request.branch))?;
        }
        Ok(FAKE_COMMIT.to_string())
    }
}

/// Helper to create a test StaticSite record with a minted token
pub fn create_test_site(namespace: &str, name: &str, path: &str) -> StaticSite {
    StaticSite {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: StaticSiteSpec {
            repo: TEST_REPO.to_string(),
            branch: "main".to_string(),
            path: path.to_string(),
            ..Default::default()
        },
        status: Some(StaticSiteStatus {
            auth_token: Some(format!("token-{name}")),
            ..Default::default()
        }),
    }
}

/// Engine plus handles on its fakes
pub struct TestHarness {
    pub engine: Arc<SyncEngine>,
    pub store: MockSiteStore,
    pub fetcher: FakeFetcher,
    pub layout: ContentLayout,
    _root: TempDir,
}

impl TestHarness {
    /// Engine over a temporary content root; the fake repository holds
    /// `index.html` and `dist/index.html`
    pub fn new() -> Self {
        Self::wrapping_fetcher(|fetcher, _, _| Arc::new(fetcher))
    }

    /// Like [`TestHarness::new`], but the engine fetches through whatever
    /// `wrap` builds around the fake fetcher
    pub fn wrapping_fetcher<F>(wrap: F) -> Self
    where
        F: FnOnce(FakeFetcher, &MockSiteStore, &ContentLayout) -> Arc<dyn RepoFetcher>,
    {
        let root = TempDir::new().unwrap();
        let layout = ContentLayout::new(root.path());
        let store = MockSiteStore::new();
        let fetcher = FakeFetcher::with_files(&["index.html", "dist/index.html"]);
        let engine = SyncEngine::new(
            Arc::new(store.clone()),
            wrap(fetcher.clone(), &store, &layout),
            layout.clone(),
            HostAllowlist::parse("*.example.com"),
            SyncSettings {
                git_timeout: Duration::from_secs(30),
                default_username: "git".to_string(),
            },
            SyncMetrics::new().unwrap(),
        );
        Self {
            engine: Arc::new(engine),
            store,
            fetcher,
            layout,
            _root: root,
        }
    }

    /// Root of the content volume
    pub fn root(&self) -> &Path {
        self.layout.root()
    }
}

//! One-way Git mirroring
//!
//! A checkout is a disposable mirror of a single branch: the first sync
//! clones just that branch, later syncs fetch it again and hard-reset the
//! working tree onto the fetched commit. Local history and local changes are
//! discarded.
//!
//! libgit2 is blocking, so every operation runs on the blocking pool under a
//! deadline. The deadline and a cancel flag are checked from the progress
//! callbacks so a slow download is aborted instead of pinning a thread. A
//! fetch never returns while its thread may still write to the checkout.

use crate::error::SyncError;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{AutotagOption, Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository, ResetType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Length of the commit hash reported in `status.lastCommit`
pub const SHORT_HASH_LEN: usize = 7;

const REMOTE: &str = "origin";

/// Time past the deadline libgit2 gets to finish the checkout
const CHECKOUT_GRACE: Duration = Duration::from_secs(1);

/// Username/password pair for https remotes
#[derive(Clone, PartialEq, Eq)]
pub struct GitCredentials {
    /// Username
    pub username: String,
    /// Password or access token
    pub password: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What to mirror
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Validated remote URL
    pub url: String,
    /// Branch to mirror
    pub branch: String,
    /// Credentials for private repositories
    pub credentials: Option<GitCredentials>,
    /// Deadline for the whole clone or pull
    pub timeout: Duration,
}

/// Brings a checkout directory up to date with a remote branch
#[async_trait::async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Clones or pulls `request` into `dest`, returning the short commit hash
    async fn fetch(&self, request: FetchRequest, dest: PathBuf) -> Result<String, SyncError>;
}

/// libgit2-backed fetcher
#[derive(Debug, Clone, Copy)]
pub struct GitFetcher {
    depth: Option<i32>,
}

impl GitFetcher {
    /// Fetcher that only transfers the tip commit
    pub fn shallow() -> Self {
        Self { depth: Some(1) }
    }

    /// Fetcher that transfers full history
    #[cfg(test)]
    pub fn full() -> Self {
        Self { depth: None }
    }
}

#[async_trait::async_trait]
impl RepoFetcher for GitFetcher {
    async fn fetch(&self, request: FetchRequest, dest: PathBuf) -> Result<String, SyncError> {
        let timeout = request.timeout;
        let depth = self.depth;
        run_until_deadline(timeout, move |cancel| {
            let deadline = Instant::now() + timeout;
            sync_checkout(&request, depth, &dest, deadline, &cancel)
        })
        .await
    }
}

/// Runs `work` on the blocking pool, raising its cancel flag once `timeout`
/// (plus the checkout grace) has passed.
///
/// After an overrun this still waits for `work` to return, so the caller's
/// site lock covers every write to the checkout.
async fn run_until_deadline<T, F>(timeout: Duration, work: F) -> Result<T, SyncError>
where
    F: FnOnce(Arc<AtomicBool>) -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let mut task = tokio::task::spawn_blocking({
        let cancel = Arc::clone(&cancel);
        move || work(cancel)
    });
    match tokio::time::timeout(timeout + CHECKOUT_GRACE, &mut task).await {
        Ok(joined) => joined?,
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            warn!(
                "Git operation overran {}, waiting for it to stop",
                humantime::format_duration(timeout)
            );
            if let Err(e) = task.await {
                warn!("Git task failed after timeout: {}", e);
            }
            Err(SyncError::Timeout(timeout))
        }
    }
}

/// Whether `dir` holds a clone
pub fn is_clone(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Clones or pulls on the current thread
pub fn sync_checkout(
    request: &FetchRequest,
    depth: Option<i32>,
    dest: &Path,
    deadline: Instant,
    cancel: &Arc<AtomicBool>,
) -> Result<String, SyncError> {
    let result = if is_clone(dest) {
        pull(request, depth, dest, deadline, cancel)
    } else {
        clone(request, depth, dest, deadline, cancel)
    };
    result.map_err(|e| match e {
        SyncError::Git(_) if Instant::now() >= deadline || cancel.load(Ordering::Relaxed) => {
            SyncError::Timeout(request.timeout)
        }
        other => other,
    })
}

fn refspec(branch: &str) -> String {
    format!("+refs/heads/{branch}:refs/remotes/{REMOTE}/{branch}")
}

fn fetch_options(
    request: &FetchRequest,
    depth: Option<i32>,
    deadline: Instant,
    cancel: &Arc<AtomicBool>,
) -> FetchOptions<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(credentials) = request.credentials.clone() {
        // libgit2 asks again after a rejection; answering twice would loop
        let mut attempted = false;
        callbacks.credentials(move |_url, _username, allowed| {
            if attempted || !allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Err(git2::Error::from_str("repository credentials were rejected"));
            }
            attempted = true;
            Cred::userpass_plaintext(&credentials.username, &credentials.password)
        });
    }
    let proceed = {
        let cancel = Arc::clone(cancel);
        move || !cancel.load(Ordering::Relaxed) && Instant::now() < deadline
    };
    let on_sideband = proceed.clone();
    callbacks.transfer_progress(move |_| proceed());
    callbacks.sideband_progress(move |_| on_sideband());

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options.download_tags(AutotagOption::None);
    if let Some(depth) = depth {
        options.depth(depth);
    }
    options
}

fn clone(
    request: &FetchRequest,
    depth: Option<i32>,
    dest: &Path,
    deadline: Instant,
    cancel: &Arc<AtomicBool>,
) -> Result<String, SyncError> {
    // leftovers of an interrupted clone
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    debug!("Cloning {} ({}) into {}", request.url, request.branch, dest.display());

    let spec = refspec(&request.branch);
    let mut builder = RepoBuilder::new();
    builder.branch(&request.branch);
    builder.fetch_options(fetch_options(request, depth, deadline, cancel));
    builder.remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &spec));

    let repo = match builder.clone(&request.url, dest) {
        Ok(repo) => repo,
        Err(e) => {
            // never leave a half-written clone behind
            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            return Err(e.into());
        }
    };
    let head = repo.head()?.peel_to_commit()?;
    Ok(short_hash(head.id()))
}

fn pull(
    request: &FetchRequest,
    depth: Option<i32>,
    dest: &Path,
    deadline: Instant,
    cancel: &Arc<AtomicBool>,
) -> Result<String, SyncError> {
    debug!("Pulling {} ({}) into {}", request.url, request.branch, dest.display());
    let repo = Repository::open(dest)?;
    // the record may name a different remote since the clone
    repo.remote_set_url(REMOTE, &request.url)?;

    let mut remote = repo.find_remote(REMOTE)?;
    let mut options = fetch_options(request, depth, deadline, cancel);
    remote.fetch(&[refspec(&request.branch).as_str()], Some(&mut options), None)?;

    let fetched = repo.find_reference(&format!("refs/remotes/{REMOTE}/{}", request.branch))?;
    let commit = fetched.peel_to_commit()?;

    let local = format!("refs/heads/{}", request.branch);
    repo.reference(&local, commit.id(), true, "content-sync: mirror remote branch")?;
    repo.set_head(&local)?;

    repo.reset(commit.as_object(), ResetType::Hard, None)?;
    // a hard reset keeps untracked files
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_head(Some(&mut checkout))?;

    Ok(short_hash(commit.id()))
}

fn short_hash(id: git2::Oid) -> String {
    id.to_string().chars().take(SHORT_HASH_LEN).collect()
}

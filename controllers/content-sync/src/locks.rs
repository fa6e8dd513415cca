//! Per-site mutual exclusion
//!
//! The periodic pass, webhook dispatches and manual calls all touch the same
//! working directories. Every operation on a site's directories holds that
//! site's lock, so a clone never races a pull, a relink or a delete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held while a site's directories are in use
pub type SiteGuard = OwnedMutexGuard<()>;

/// Lazily created async mutex per site key
#[derive(Debug, Clone, Default)]
pub struct SiteLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SiteLocks {
    /// Empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Waits for the lock of `key`
    pub async fn lock(&self, key: &str) -> SiteGuard {
        self.entry(key).lock_owned().await
    }

    /// Takes the lock of `key` if nobody holds it
    pub fn try_lock(&self, key: &str) -> Option<SiteGuard> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Drops the lock of a site that no longer exists, unless it is held
    pub fn forget(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

//! In-memory clients for unit testing
//!
//! These mocks mimic the API server closely enough for controller tests:
//! status patches are applied as JSON merge patches, updates are checked
//! against the stored resourceVersion, and a record whose deletion was
//! requested disappears once its last finalizer is removed.

use crate::client_trait::{EventPublisher, ResourceClientTrait, SiteEvent, SiteStoreTrait};
use crate::error::StoreError;
use crate::patch::merge_patch;
use crate::resources::EdgeResource;
use crds::{StaticSite, StaticSiteStatus, SITE_FINALIZER};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type SiteKey = (String, String);

fn key(namespace: &str, name: &str) -> SiteKey {
    (namespace.to_string(), name.to_string())
}

/// Mock record store
#[derive(Clone, Default)]
pub struct MockSiteStore {
    sites: Arc<Mutex<HashMap<SiteKey, StaticSite>>>,
    secrets: Arc<Mutex<HashMap<SiteKey, BTreeMap<String, String>>>>,
    status_patches: Arc<Mutex<Vec<(SiteKey, serde_json::Value)>>>,
    generation: Arc<AtomicU64>,
    fail_status_patches: Arc<AtomicBool>,
    fail_list: Arc<AtomicBool>,
}

impl MockSiteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record (for test setup)
    pub fn add_site(&self, site: StaticSite) {
        let k = key(site.namespace_or_default(), site.name_or_empty());
        self.sites.lock().unwrap().insert(k, site);
    }

    /// Remove a record (for test setup)
    pub fn remove_site(&self, namespace: &str, name: &str) {
        self.sites.lock().unwrap().remove(&key(namespace, name));
    }

    /// Add a Secret (for test setup)
    pub fn add_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.secrets.lock().unwrap().insert(key(namespace, name), data);
    }

    /// Current copy of a record
    pub fn site(&self, namespace: &str, name: &str) -> Option<StaticSite> {
        self.sites.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Current status of a record
    pub fn status(&self, namespace: &str, name: &str) -> Option<StaticSiteStatus> {
        self.site(namespace, name).and_then(|s| s.status)
    }

    /// Marks a record as being deleted, as the API server does when it holds finalizers
    pub fn request_deletion(&self, namespace: &str, name: &str) {
        if let Some(site) = self.sites.lock().unwrap().get_mut(&key(namespace, name)) {
            site.metadata.deletion_timestamp = serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).ok();
        }
    }

    /// Every status patch received, in order
    pub fn status_patches(&self) -> Vec<(SiteKey, serde_json::Value)> {
        self.status_patches.lock().unwrap().clone()
    }

    /// Make status patches fail
    pub fn set_fail_status_patches(&self, fail: bool) {
        self.fail_status_patches.store(fail, Ordering::SeqCst);
    }

    /// Make list calls fail
    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    fn bump_version(&self, site: &mut StaticSite) {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        site.metadata.resource_version = Some(next.to_string());
    }
}

#[async_trait::async_trait]
impl SiteStoreTrait for MockSiteStore {
    async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<StaticSite>, StoreError> {
        Ok(self.site(namespace, name))
    }

    async fn list_sites(&self) -> Result<Vec<StaticSite>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StoreError::Api("list failed".to_string()));
        }
        let mut sites: Vec<StaticSite> = self.sites.lock().unwrap().values().cloned().collect();
        sites.sort_by(|a, b| {
            (a.namespace_or_default(), a.name_or_empty()).cmp(&(b.namespace_or_default(), b.name_or_empty()))
        });
        Ok(sites)
    }

    async fn add_finalizer(&self, site: &StaticSite) -> Result<(), StoreError> {
        let k = key(site.namespace_or_default(), site.name_or_empty());
        let mut sites = self.sites.lock().unwrap();
        let stored = sites.get_mut(&k).ok_or_else(|| StoreError::NotFound(format!("{}/{}", k.0, k.1)))?;
        if !stored.has_finalizer() {
            stored.metadata.finalizers.get_or_insert_with(Vec::new).push(SITE_FINALIZER.to_string());
        }
        let mut updated = stored.clone();
        self.bump_version(&mut updated);
        *stored = updated;
        Ok(())
    }

    async fn remove_finalizer(&self, site: &StaticSite) -> Result<(), StoreError> {
        let k = key(site.namespace_or_default(), site.name_or_empty());
        let mut sites = self.sites.lock().unwrap();
        let Some(stored) = sites.get_mut(&k) else {
            return Err(StoreError::NotFound(format!("{}/{}", k.0, k.1)));
        };
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != SITE_FINALIZER);
        }
        let gone = stored.is_being_deleted() && stored.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if gone {
            sites.remove(&k);
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        if self.fail_status_patches.load(Ordering::SeqCst) {
            return Err(StoreError::Api("status patch failed".to_string()));
        }
        let k = key(namespace, name);
        self.status_patches.lock().unwrap().push((k.clone(), status.clone()));

        let mut sites = self.sites.lock().unwrap();
        let stored = sites.get_mut(&k).ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))?;
        let mut current = serde_json::to_value(stored.status.clone().unwrap_or_default())?;
        merge_patch(&mut current, &status);
        stored.status = Some(serde_json::from_value(current)?);
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        Ok(self.secrets.lock().unwrap().get(&key(namespace, name)).cloned())
    }
}

/// Mock typed resource client
#[derive(Clone)]
pub struct MockResourceClient<R> {
    objects: Arc<Mutex<HashMap<String, R>>>,
    next_version: Arc<AtomicU64>,
    fail_gets: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl<R: EdgeResource> Default for MockResourceClient<R> {
    fn default() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
            fail_gets: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<R: EdgeResource> MockResourceClient<R> {
    /// Create an empty client
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, assigning a fresh resourceVersion (for test setup)
    pub fn insert(&self, mut resource: R) {
        resource.meta_mut().resource_version = Some(self.next_rv());
        self.objects.lock().unwrap().insert(resource.name().to_string(), resource);
    }

    /// Current copy of an object
    pub fn object(&self, name: &str) -> Option<R> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    /// Names of every stored object, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Make `get` fail with an API error
    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Make create/update/delete fail with an API error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn next_rv(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Api(format!("{} write failed", R::KIND)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<R: EdgeResource> ResourceClientTrait<R> for MockResourceClient<R> {
    async fn get(&self, name: &str) -> Result<Option<R>, StoreError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Api(format!("{} get failed", R::KIND)));
        }
        Ok(self.object(name))
    }

    async fn create(&self, resource: &R) -> Result<R, StoreError> {
        self.check_writes()?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(resource.name()) {
            return Err(StoreError::Conflict(format!("{} {} already exists", R::KIND, resource.name())));
        }
        let mut stored = resource.clone();
        stored.meta_mut().resource_version = Some(self.next_rv());
        objects.insert(stored.name().to_string(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, resource: &R) -> Result<R, StoreError> {
        self.check_writes()?;
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(resource.name())
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", R::KIND, resource.name())))?;
        if current.meta().resource_version != resource.meta().resource_version {
            return Err(StoreError::Conflict(format!("{} {} is stale", R::KIND, resource.name())));
        }
        let mut stored = resource.clone();
        stored.meta_mut().resource_version = Some(self.next_rv());
        objects.insert(stored.name().to_string(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        self.check_writes()?;
        Ok(self.objects.lock().unwrap().remove(name).is_some())
    }
}

/// Mock event publisher recording every event
#[derive(Clone, Default)]
pub struct MockEventPublisher {
    events: Arc<Mutex<Vec<(String, SiteEvent)>>>,
}

impl MockEventPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events as `(namespace/name, event)`
    pub fn events(&self) -> Vec<(String, SiteEvent)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, site: &StaticSite, event: SiteEvent) -> Result<(), StoreError> {
        let target = format!("{}/{}", site.namespace_or_default(), site.name_or_empty());
        self.events.lock().unwrap().push((target, event));
        Ok(())
    }
}

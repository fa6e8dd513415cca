//! Kubernetes-backed clients
//!
//! Every call runs under the configured timeout; a timed out call surfaces
//! as [`StoreError::Timeout`] and is retried by the caller's loop.

use crate::client_trait::{EventPublisher, ResourceClientTrait, SiteEvent, SiteEventType, SiteStoreTrait};
use crate::error::StoreError;
use crate::resources::EdgeResource;
use crds::{StaticSite, SITE_FINALIZER};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

async fn timed<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| StoreError::from_kube(e, what)),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

/// StaticSite record store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSiteStore {
    client: Client,
    timeout: Duration,
}

impl KubeSiteStore {
    /// Create a new store
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn sites(&self, namespace: &str) -> Api<StaticSite> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Writes the finalizer list guarded by the record's resourceVersion
    async fn write_finalizers(&self, site: &StaticSite, finalizers: Vec<String>) -> Result<(), StoreError> {
        let namespace = site.namespace_or_default();
        let name = site.name_or_empty();
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": site.metadata.resource_version,
            }
        });
        let what = format!("StaticSite {}/{}", namespace, name);
        timed(
            self.timeout,
            &what,
            self.sites(namespace).patch(name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SiteStoreTrait for KubeSiteStore {
    async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<StaticSite>, StoreError> {
        let what = format!("StaticSite {}/{}", namespace, name);
        timed(self.timeout, &what, self.sites(namespace).get_opt(name)).await
    }

    async fn list_sites(&self) -> Result<Vec<StaticSite>, StoreError> {
        let api: Api<StaticSite> = Api::all(self.client.clone());
        let list = timed(self.timeout, "StaticSite list", api.list(&ListParams::default())).await?;
        Ok(list.items)
    }

    async fn add_finalizer(&self, site: &StaticSite) -> Result<(), StoreError> {
        if site.has_finalizer() {
            return Ok(());
        }
        let mut finalizers = site.metadata.finalizers.clone().unwrap_or_default();
        finalizers.push(SITE_FINALIZER.to_string());
        self.write_finalizers(site, finalizers).await
    }

    async fn remove_finalizer(&self, site: &StaticSite) -> Result<(), StoreError> {
        if !site.has_finalizer() {
            return Ok(());
        }
        let finalizers: Vec<String> = site
            .metadata
            .finalizers
            .iter()
            .flatten()
            .filter(|f| f.as_str() != SITE_FINALIZER)
            .cloned()
            .collect();
        self.write_finalizers(site, finalizers).await
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": status });
        let what = format!("StaticSite {}/{} status", namespace, name);
        timed(
            self.timeout,
            &what,
            self.sites(namespace).patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let what = format!("Secret {}/{}", namespace, name);
        let Some(secret) = timed(self.timeout, &what, api.get_opt(name)).await? else {
            return Ok(None);
        };

        let mut values = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            values.insert(key, String::from_utf8_lossy(&bytes.0).into_owned());
        }
        // stringData is write-only on a real server but appears in fixtures
        for (key, value) in secret.string_data.unwrap_or_default() {
            values.entry(key).or_insert(value);
        }
        Ok(Some(values))
    }
}

/// Typed client for one downstream kind, bound to one namespace
#[derive(Clone)]
pub struct KubeResourceClient<R> {
    api: Api<DynamicObject>,
    api_resource: ApiResource,
    namespace: String,
    timeout: Duration,
    _kind: PhantomData<fn() -> R>,
}

impl<R: EdgeResource> KubeResourceClient<R> {
    /// Create a client for `api_resource` in `namespace`
    pub fn new(client: Client, api_resource: ApiResource, namespace: &str, timeout: Duration) -> Self {
        Self {
            api: Api::namespaced_with(client, namespace, &api_resource),
            api_resource,
            namespace: namespace.to_string(),
            timeout,
            _kind: PhantomData,
        }
    }

    fn describe(&self, name: &str) -> String {
        format!("{} {}/{}", R::KIND, self.namespace, name)
    }
}

#[async_trait::async_trait]
impl<R: EdgeResource> ResourceClientTrait<R> for KubeResourceClient<R> {
    async fn get(&self, name: &str) -> Result<Option<R>, StoreError> {
        let what = self.describe(name);
        match timed(self.timeout, &what, self.api.get_opt(name)).await? {
            Some(obj) => Ok(Some(R::from_dynamic(&obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, resource: &R) -> Result<R, StoreError> {
        let what = self.describe(resource.name());
        let obj = resource.to_dynamic(&self.api_resource, &self.namespace)?;
        let created = timed(self.timeout, &what, self.api.create(&PostParams::default(), &obj)).await?;
        debug!("Created {}", what);
        R::from_dynamic(&created)
    }

    async fn update(&self, resource: &R) -> Result<R, StoreError> {
        let what = self.describe(resource.name());
        if resource.meta().resource_version.is_none() {
            return Err(StoreError::InvalidResource(format!("{} has no resourceVersion", what)));
        }
        let obj = resource.to_dynamic(&self.api_resource, &self.namespace)?;
        let replaced = timed(
            self.timeout,
            &what,
            self.api.replace(resource.name(), &PostParams::default(), &obj),
        )
        .await?;
        debug!("Updated {}", what);
        R::from_dynamic(&replaced)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let what = self.describe(name);
        match timed(self.timeout, &what, self.api.delete(name, &DeleteParams::default())).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Publishes Kubernetes Events through the kube-runtime recorder
#[derive(Clone)]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller`
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self { recorder: Recorder::new(client, reporter) }
    }
}

#[async_trait::async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, site: &StaticSite, event: SiteEvent) -> Result<(), StoreError> {
        let type_ = match event.event_type {
            SiteEventType::Normal => EventType::Normal,
            SiteEventType::Warning => EventType::Warning,
        };
        let ev = Event {
            type_,
            reason: event.reason.clone(),
            note: Some(event.note),
            action: event.reason,
            secondary: None,
        };
        self.recorder.publish(&ev, &site.object_ref(&())).await?;
        Ok(())
    }
}

//! Kubernetes resource watcher.
//!
//! Drives the reconciler from a kube_runtime::Controller, which handles
//! reconnection, per-object serialization and requeues.

use crate::error::ControllerError;
use crate::reconciler::{ERROR_REQUEUE, Reconciler};
use crds::StaticSite;
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Maximum number of sites reconciled in parallel
const CONCURRENCY: u16 = 4;

async fn reconcile(site: Arc<StaticSite>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let (namespace, name) = (site.namespace_or_default(), site.name_or_empty());
    debug!("Reconciling StaticSite {}/{}", namespace, name);
    let outcome = reconciler.reconcile(namespace, name).await?;
    debug!("StaticSite {}/{}: {}", namespace, name, outcome.as_str());
    Ok(match outcome.requeue_after() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

fn error_policy(site: Arc<StaticSite>, error: &ControllerError, _ctx: Arc<Reconciler>) -> Action {
    error!(
        "Reconciliation error for StaticSite {}/{}: {}",
        site.namespace_or_default(),
        site.name_or_empty(),
        error
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Watches StaticSite records until `shutdown` is cancelled.
///
/// The controller never runs two passes for the same record at once;
/// distinct records are reconciled concurrently.
pub async fn watch_static_sites(
    api: Api<StaticSite>,
    reconciler: Arc<Reconciler>,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    info!("Starting StaticSite watcher");

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(CONCURRENCY);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .take_until(shutdown.cancelled_owned())
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for StaticSite: {}", e);
            }
        })
        .await;

    info!("StaticSite watcher stopped");
    Ok(())
}

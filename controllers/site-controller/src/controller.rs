//! Main controller implementation.
//!
//! Wires the kube client, resource registry and reconciler together, then
//! runs the StaticSite watcher and the probe server until a shutdown signal
//! arrives.

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::ReconcileMetrics;
use crate::probes;
use crate::reconciler::Reconciler;
use crate::watcher::watch_static_sites;
use cluster_client::{Certificate, IngressRoute, Middleware, ResourceRegistry};
use crds::StaticSite;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Name reported on Kubernetes Events
const CONTROLLER_NAME: &str = "sitehost-site-controller";

/// Time the watcher gets to finish in-flight passes after shutdown
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Main controller for StaticSite records.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probes: JoinHandle<Result<(), ControllerError>>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing site controller");

        let kube_client = Client::try_default().await?;
        let registry = ResourceRegistry::discover(&kube_client).await;

        let serving_ns = config.reconciler.serving_namespace.clone();
        let timeout = config.api_timeout;
        let metrics = ReconcileMetrics::new()?;

        let reconciler = Arc::new(Reconciler::new(
            config.reconciler.clone(),
            Arc::new(registry.site_store(kube_client.clone(), timeout)),
            Arc::new(registry.resource_client::<Middleware>(kube_client.clone(), &serving_ns, timeout)),
            Arc::new(registry.resource_client::<IngressRoute>(kube_client.clone(), &serving_ns, timeout)),
            Arc::new(registry.resource_client::<Certificate>(kube_client.clone(), &serving_ns, timeout)),
            Arc::new(registry.event_publisher(kube_client.clone(), CONTROLLER_NAME)),
            metrics.clone(),
        ));

        let api: Api<StaticSite> = match &config.watch_namespace {
            Some(ns) => Api::namespaced(kube_client, ns),
            None => Api::all(kube_client),
        };

        let shutdown = CancellationToken::new();
        let watcher = tokio::spawn(watch_static_sites(api, reconciler, shutdown.clone()));

        let listener = TcpListener::bind(config.probe_addr).await?;
        let probes = tokio::spawn(probes::serve(listener, metrics, shutdown.clone()));

        Ok(Self { watcher, probes, shutdown })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Site controller running");

        tokio::select! {
            result = &mut self.watcher => {
                self.shutdown.cancel();
                result.map_err(|e| ControllerError::Watch(format!("StaticSite watcher panicked: {}", e)))??;
                return Err(ControllerError::Watch("StaticSite watcher exited".to_string()));
            }
            result = &mut self.probes => {
                self.shutdown.cancel();
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
                return Err(ControllerError::Watch("Probe server exited".to_string()));
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received");
                self.shutdown.cancel();
            }
        }

        if tokio::time::timeout(DRAIN_GRACE, &mut self.watcher).await.is_err() {
            warn!("StaticSite watcher did not stop within {:?}", DRAIN_GRACE);
            self.watcher.abort();
        }
        if tokio::time::timeout(DRAIN_GRACE, &mut self.probes).await.is_err() {
            self.probes.abort();
        }
        info!("Site controller stopped");
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

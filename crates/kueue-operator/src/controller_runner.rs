//! Controller runner - builds the ClusterQueue controller futures
//!
//! Returns boxed futures the caller drives to completion; every future
//! stops once the shared cancellation token fires.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use kueue_clusterqueue::{watch_cluster_queues, ClusterQueueReconciler, KubeStore};
use kueue_common::crd::{ClusterQueue, Workload};
use kueue_state::{InMemoryCache, InMemoryQueueManager};

use crate::workload_feed::{watch_workloads, WorkloadFeed};

/// Runtime knobs for the ClusterQueue controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Concurrent reconcile workers
    pub workers: usize,
    /// Server-side watch timeout; must stay below the client read timeout (30s)
    pub watch_timeout_secs: u32,
    /// Period for re-queueing every known ClusterQueue, if any
    pub resync: Option<Duration>,
}

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the reconcile workers, the ClusterQueue watcher and the Workload watcher
pub fn build_cluster_queue_controllers(
    client: Client,
    settings: &ControllerSettings,
    shutdown: CancellationToken,
) -> Vec<ControllerFuture> {
    let cache = Arc::new(InMemoryCache::new());
    let queues = Arc::new(InMemoryQueueManager::new());
    let reconciler = ClusterQueueReconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        cache.clone(),
        queues.clone(),
    );

    let watcher_config = WatcherConfig::default().timeout(settings.watch_timeout_secs);
    let cluster_queues: Api<ClusterQueue> = Api::all(client.clone());
    let workloads: Api<Workload> = Api::all(client);

    tracing::info!(workers = settings.workers, "- ClusterQueue controller");
    tracing::info!("- Workload feed");

    let workers = {
        let reconciler = reconciler.clone();
        let workers = settings.workers;
        let shutdown = shutdown.clone();
        async move {
            log_run_result("ClusterQueue", reconciler.run(workers, shutdown).await);
        }
    };

    vec![
        Box::pin(workers),
        Box::pin(watch_cluster_queues(
            cluster_queues,
            watcher_config.clone(),
            reconciler.clone(),
            settings.resync,
            shutdown.clone(),
        )),
        Box::pin(watch_workloads(
            workloads,
            watcher_config,
            WorkloadFeed::new(cache, queues),
            reconciler,
            shutdown,
        )),
    ]
}

fn log_run_result<E: std::fmt::Display>(controller_name: &'static str, result: Result<(), E>) {
    match result {
        Ok(()) => tracing::info!("{} controller stopped", controller_name),
        Err(e) => tracing::error!(error = %e, "{} controller failed", controller_name),
    }
}

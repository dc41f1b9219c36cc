//! ClusterQueue reconciler and its worker loop
//!
//! Each reconcile re-reads the ClusterQueue, recomputes its status from the
//! cache and queue manager, and writes it back only when it changed. The
//! work queue guarantees at most one reconcile per ClusterQueue name at a
//! time; different names are reconciled in parallel by the worker pool.

use std::sync::Arc;

use kube::ResourceExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use kueue_common::crd::{ClusterQueue, ClusterQueueStatus, Workload};
use kueue_state::{ClusterQueueCache, QueueManager};

use crate::bridge::{workload_update_channel, WorkloadHandler, WorkloadUpdateSender};
use crate::event::{WatchEvent, WatchedObject};
use crate::gate::EventGate;
use crate::references::ReferenceSynchronizer;
use crate::status::StatusComputer;
use crate::store::ClusterQueueStore;
use crate::workqueue::WorkQueue;
use crate::Error;

/// What a reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The ClusterQueue no longer exists
    Missing,
    /// The persisted status already matched
    Unchanged,
    /// The status was written
    Updated,
}

/// Reconciles ClusterQueue status and drives the event gate and workload bridge
pub struct ClusterQueueReconciler {
    store: Arc<dyn ClusterQueueStore>,
    status: StatusComputer,
    gate: EventGate,
    handler: WorkloadHandler,
    queue: Arc<WorkQueue>,
    workload_tx: WorkloadUpdateSender,
    workload_rx: Mutex<Option<mpsc::Receiver<Arc<Workload>>>>,
}

impl ClusterQueueReconciler {
    /// Wire a reconciler to its collaborators
    pub fn new(
        store: Arc<dyn ClusterQueueStore>,
        cache: Arc<dyn ClusterQueueCache>,
        queues: Arc<dyn QueueManager>,
    ) -> Arc<Self> {
        let (workload_tx, workload_rx) = workload_update_channel();
        Arc::new(Self {
            status: StatusComputer::new(cache.clone(), queues.clone()),
            gate: EventGate::new(
                cache,
                queues.clone(),
                ReferenceSynchronizer::new(store.clone()),
            ),
            handler: WorkloadHandler::new(queues),
            store,
            queue: WorkQueue::new(),
            workload_tx,
            workload_rx: Mutex::new(Some(workload_rx)),
        })
    }

    /// The reconcile work queue
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Report a changed workload; waits while the notification buffer is full
    pub async fn notify_workload_update(&self, workload: Arc<Workload>) {
        self.workload_tx.notify(workload).await;
    }

    /// Desired status of a ClusterQueue
    pub fn status(&self, cq: &ClusterQueue) -> Result<ClusterQueueStatus, Error> {
        self.status.compute(cq)
    }

    /// Bring the persisted status of the named ClusterQueue up to date
    #[instrument(skip_all, fields(cluster_queue = %name))]
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, Error> {
        let Some(mut cq) = self.store.get_cluster_queue(name).await? else {
            debug!("ClusterQueue not found, nothing to do");
            return Ok(ReconcileOutcome::Missing);
        };
        debug!("Reconciling ClusterQueue");

        let status = self.status(&cq)?;
        if cq
            .status
            .as_ref()
            .is_some_and(|current| current.semantic_eq(&status))
        {
            return Ok(ReconcileOutcome::Unchanged);
        }

        cq.status = Some(status);
        match self.store.update_cluster_queue_status(&cq).await {
            Ok(()) => Ok(ReconcileOutcome::Updated),
            Err(e) if e.is_not_found() => Ok(ReconcileOutcome::Missing),
            Err(e) => Err(e),
        }
    }

    /// Pass a watch notification through the gate and enqueue admitted ClusterQueues
    pub async fn handle_event(&self, event: WatchEvent) -> bool {
        if !self.gate.admit(&event).await {
            debug!(object = %event.object().name(), "Event suppressed by gate");
            return false;
        }
        if let WatchedObject::ClusterQueue(cq) = event.object() {
            self.queue.add(&cq.name_any());
        }
        true
    }

    /// Run `workers` reconcile workers and the workload bridge until `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Result<(), Error> {
        let workload_rx = self
            .workload_rx
            .lock()
            .take()
            .ok_or(Error::AlreadyRunning)?;

        info!(workers, "Starting ClusterQueue controller");
        let mut tasks = JoinSet::new();

        let bridge = self.clone();
        let bridge_shutdown = shutdown.clone();
        tasks.spawn(async move { bridge.bridge_workloads(workload_rx, bridge_shutdown).await });

        for _ in 0..workers.max(1) {
            let worker = self.clone();
            tasks.spawn(async move { while worker.process_next().await {} });
        }

        shutdown.cancelled().await;
        info!("Shutting down ClusterQueue controller");
        self.queue.shut_down();

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "ClusterQueue controller task failed");
            }
        }
        Ok(())
    }

    async fn process_next(&self) -> bool {
        let Some(name) = self.queue.get().await else {
            return false;
        };

        match self.reconcile(&name).await {
            Ok(outcome) => {
                debug!(cluster_queue = %name, ?outcome, "Reconciled ClusterQueue");
                self.queue.forget(&name);
            }
            Err(e) => {
                self.queue.add_rate_limited(&name);
                warn!(
                    cluster_queue = %name,
                    error = %e,
                    failures = self.queue.failures(&name),
                    "ClusterQueue reconcile failed, will retry"
                );
            }
        }
        self.queue.done(&name);
        true
    }

    async fn bridge_workloads(
        &self,
        mut rx: mpsc::Receiver<Arc<Workload>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let workload = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(workload) => workload,
                    None => break,
                },
            };

            let event = WatchEvent::Generic(WatchedObject::Workload(workload.clone()));
            if self.gate.admit(&event).await {
                self.handler.generic(&workload, &self.queue);
            }
        }
        debug!("Workload bridge stopped");
    }
}

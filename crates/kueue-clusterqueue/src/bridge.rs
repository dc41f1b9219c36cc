//! Workload notifications bridged into ClusterQueue reconciles
//!
//! Other parts of the operator push changed workloads into a bounded
//! channel. The controller drains it, resolves the ClusterQueue that owns
//! each workload, and enqueues that queue after the batch period so a burst
//! of workload changes costs one reconcile.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use kueue_common::crd::Workload;
use kueue_common::UPDATES_BATCH_PERIOD;
use kueue_state::QueueManager;

use crate::workqueue::WorkQueue;

/// Capacity of the workload notification channel
pub const WORKLOAD_UPDATE_BUFFER: usize = 10;

/// Create the bounded workload notification channel
pub fn workload_update_channel() -> (WorkloadUpdateSender, mpsc::Receiver<Arc<Workload>>) {
    let (tx, rx) = mpsc::channel(WORKLOAD_UPDATE_BUFFER);
    (WorkloadUpdateSender { tx }, rx)
}

/// Sending half of the workload notification channel
#[derive(Clone, Debug)]
pub struct WorkloadUpdateSender {
    tx: mpsc::Sender<Arc<Workload>>,
}

impl WorkloadUpdateSender {
    /// Push a changed workload; waits while the channel is full
    pub async fn notify(&self, workload: Arc<Workload>) {
        let key = workload.key();
        if self.tx.send(workload).await.is_err() {
            debug!(workload = %key, "Workload channel closed, dropping notification");
        }
    }
}

/// Maps workload notifications to reconcile requests for their ClusterQueue
pub struct WorkloadHandler {
    queues: Arc<dyn QueueManager>,
}

impl WorkloadHandler {
    /// Create a handler resolving pending workloads through the queue manager
    pub fn new(queues: Arc<dyn QueueManager>) -> Self {
        Self { queues }
    }

    /// ClusterQueue owning the workload: the admitting queue, else the queue
    /// holding it pending. `None` if neither is known.
    pub fn request_for_workload(&self, workload: &Workload) -> Option<String> {
        match workload.admitted_cluster_queue() {
            Some(cq) => Some(cq.to_string()),
            None => self.queues.cluster_queue_for_workload(workload),
        }
    }

    /// Enqueue a debounced reconcile for the workload's ClusterQueue
    pub fn generic(&self, workload: &Workload, queue: &Arc<WorkQueue>) {
        match self.request_for_workload(workload) {
            Some(cq) => {
                trace!(
                    workload = %workload.key(),
                    cluster_queue = %cq,
                    "Queueing ClusterQueue for workload change"
                );
                queue.add_after(&cq, UPDATES_BATCH_PERIOD);
            }
            None => {
                trace!(workload = %workload.key(), "Workload has no ClusterQueue, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kueue_common::crd::{Admission, ClusterQueue, ClusterQueueSpec, WorkloadSpec};
    use kueue_state::InMemoryQueueManager;
    use std::time::Duration;

    fn workload(name: &str, queue: Option<&str>, admitted_to: Option<&str>) -> Arc<Workload> {
        let mut wl = Workload::new(
            name,
            WorkloadSpec {
                queue_name: queue.map(str::to_string),
                pod_sets: vec![],
                admission: admitted_to.map(|cq| Admission {
                    cluster_queue: cq.to_string(),
                    pod_set_flavors: vec![],
                }),
            },
        );
        wl.metadata.namespace = Some("default".to_string());
        Arc::new(wl)
    }

    fn manager_with_pending(cq: &str, pending: &[Arc<Workload>]) -> Arc<InMemoryQueueManager> {
        let qm = Arc::new(InMemoryQueueManager::new());
        qm.add_cluster_queue(&ClusterQueue::new(cq, ClusterQueueSpec::default()))
            .unwrap();
        for wl in pending {
            qm.add_or_update_workload(wl);
        }
        qm
    }

    #[test]
    fn admitted_workload_resolves_to_admitting_queue() {
        let handler = WorkloadHandler::new(Arc::new(InMemoryQueueManager::new()));
        let wl = workload("a", Some("team-a"), Some("team-b"));
        assert_eq!(handler.request_for_workload(&wl), Some("team-b".to_string()));
    }

    #[test]
    fn pending_workload_resolves_through_queue_manager() {
        let wl = workload("a", Some("team-a"), None);
        let handler = WorkloadHandler::new(manager_with_pending("team-a", &[wl.clone()]));
        assert_eq!(handler.request_for_workload(&wl), Some("team-a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_workload_enqueues_nothing() {
        let handler = WorkloadHandler::new(Arc::new(InMemoryQueueManager::new()));
        let queue = WorkQueue::new();

        handler.generic(&workload("orphan", Some("ghost"), None), &queue);
        tokio::time::sleep(UPDATES_BATCH_PERIOD * 2).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_for_one_queue_yields_one_request() {
        let pending: Vec<_> = (0..8)
            .map(|i| workload(&format!("wl-{i}"), Some("team-a"), None))
            .collect();
        let handler = WorkloadHandler::new(manager_with_pending("team-a", &pending));
        let queue = WorkQueue::new();

        for wl in &pending {
            handler.generic(wl, &queue);
            tokio::time::advance(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(UPDATES_BATCH_PERIOD).await;

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("team-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_blocks_the_pusher_until_drained() {
        let (tx, mut rx) = workload_update_channel();
        for i in 0..WORKLOAD_UPDATE_BUFFER {
            tx.notify(workload(&format!("wl-{i}"), None, None)).await;
        }

        let pusher = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.notify(workload("eleventh", None, None)).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!pusher.is_finished());

        rx.recv().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), pusher)
            .await
            .expect("pusher should unblock once a slot frees")
            .unwrap();
    }
}

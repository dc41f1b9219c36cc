//! Queue manager: pending workloads per ClusterQueue

use std::collections::{HashMap, HashSet};

use kube::ResourceExt;
use parking_lot::RwLock;
use tracing::debug;

use kueue_common::crd::{ClusterQueue, Workload};

use crate::StateError;

/// Tracks known ClusterQueues and the workloads waiting in each.
///
/// Implementations must serialize concurrent mutation internally.
pub trait QueueManager: Send + Sync {
    /// Start tracking a ClusterQueue
    fn add_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError>;

    /// Refresh a tracked ClusterQueue
    fn update_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError>;

    /// Stop tracking a ClusterQueue; unknown queues are ignored
    fn delete_cluster_queue(&self, cq: &ClusterQueue);

    /// Number of pending workloads; zero for unknown queues
    fn pending(&self, cq: &ClusterQueue) -> i32;

    /// ClusterQueue currently holding the workload pending, if any
    fn cluster_queue_for_workload(&self, wl: &Workload) -> Option<String>;
}

#[derive(Debug, Default)]
struct ManagerState {
    cluster_queues: HashSet<String>,
    /// Pending workload key to the ClusterQueue it waits in
    pending: HashMap<String, String>,
}

/// Lock-guarded in-memory queue manager fed by ClusterQueue and Workload events
#[derive(Debug, Default)]
pub struct InMemoryQueueManager {
    state: RwLock<ManagerState>,
}

impl InMemoryQueueManager {
    /// Create an empty queue manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a workload as pending, or drop it once admitted or unqueued
    pub fn add_or_update_workload(&self, wl: &Workload) {
        let key = wl.key();
        let mut state = self.state.write();
        match (&wl.spec.queue_name, &wl.spec.admission) {
            (Some(queue), None) => {
                debug!(workload = %key, cluster_queue = %queue, "Workload pending");
                state.pending.insert(key, queue.clone());
            }
            _ => {
                state.pending.remove(&key);
            }
        }
    }

    /// Forget a workload
    pub fn delete_workload(&self, wl: &Workload) {
        self.state.write().pending.remove(&wl.key());
    }
}

impl QueueManager for InMemoryQueueManager {
    fn add_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError> {
        let name = cq.name_any();
        let mut state = self.state.write();
        if !state.cluster_queues.insert(name.clone()) {
            return Err(StateError::ClusterQueueAlreadyExists(name));
        }
        Ok(())
    }

    fn update_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError> {
        let name = cq.name_any();
        if self.state.read().cluster_queues.contains(&name) {
            Ok(())
        } else {
            Err(StateError::ClusterQueueNotFound(name))
        }
    }

    fn delete_cluster_queue(&self, cq: &ClusterQueue) {
        self.state.write().cluster_queues.remove(&cq.name_any());
    }

    fn pending(&self, cq: &ClusterQueue) -> i32 {
        let name = cq.name_any();
        let state = self.state.read();
        if !state.cluster_queues.contains(&name) {
            return 0;
        }
        let count = state.pending.values().filter(|q| **q == name).count();
        i32::try_from(count).unwrap_or(i32::MAX)
    }

    fn cluster_queue_for_workload(&self, wl: &Workload) -> Option<String> {
        let state = self.state.read();
        state
            .pending
            .get(&wl.key())
            .filter(|queue| state.cluster_queues.contains(*queue))
            .cloned()
    }
}

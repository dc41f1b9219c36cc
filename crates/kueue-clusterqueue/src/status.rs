//! ClusterQueue status derived from the cache and queue manager

use std::sync::Arc;

use kube::ResourceExt;
use tracing::warn;

use kueue_common::crd::{ClusterQueue, ClusterQueueStatus};
use kueue_state::{ClusterQueueCache, QueueManager};

use crate::Error;

/// Computes the desired status of a ClusterQueue
pub struct StatusComputer {
    cache: Arc<dyn ClusterQueueCache>,
    queues: Arc<dyn QueueManager>,
}

impl StatusComputer {
    /// Create a status computer reading from the given cache and queue manager
    pub fn new(cache: Arc<dyn ClusterQueueCache>, queues: Arc<dyn QueueManager>) -> Self {
        Self { cache, queues }
    }

    /// Used resources and admitted count come from the cache, pending count
    /// from the queue manager.
    ///
    /// A queue missing from the cache is an error: the cache has not caught
    /// up with a recent add, or the queue was just removed.
    pub fn compute(&self, cq: &ClusterQueue) -> Result<ClusterQueueStatus, Error> {
        let (used_resources, admitted) = self.cache.usage(cq).map_err(|e| {
            warn!(cluster_queue = %cq.name_any(), error = %e, "Failed getting usage from cache");
            e
        })?;

        Ok(ClusterQueueStatus {
            used_resources,
            admitted_workloads: i32::try_from(admitted).unwrap_or(i32::MAX),
            pending_workloads: self.queues.pending(cq),
        })
    }
}

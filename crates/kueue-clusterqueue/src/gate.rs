//! Event gate: synchronizes cache, queue manager, and flavor references as
//! ClusterQueue notifications arrive, and decides which ones are reconciled.
//!
//! Runs on the task that delivers the notification, concurrently with
//! reconciles and with other notifications. Cache and queue manager are
//! expected to serialize their own mutations.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, error, trace, warn};

use kueue_common::crd::{ClusterQueue, ClusterQueueSpec};
use kueue_state::{ClusterQueueCache, QueueManager};

use crate::event::{WatchEvent, WatchedObject};
use crate::references::ReferenceSynchronizer;

/// Admission predicates for ClusterQueue controller notifications
pub struct EventGate {
    cache: Arc<dyn ClusterQueueCache>,
    queues: Arc<dyn QueueManager>,
    references: ReferenceSynchronizer,
}

impl EventGate {
    /// Create a gate over the given cache, queue manager and reference synchronizer
    pub fn new(
        cache: Arc<dyn ClusterQueueCache>,
        queues: Arc<dyn QueueManager>,
        references: ReferenceSynchronizer,
    ) -> Self {
        Self {
            cache,
            queues,
            references,
        }
    }

    /// Run the predicate matching the event kind; `true` admits it for reconcile
    pub async fn admit(&self, event: &WatchEvent) -> bool {
        match event {
            WatchEvent::Create(obj) => self.on_create(obj).await,
            WatchEvent::Update { old, new } => self.on_update(old, new).await,
            WatchEvent::Delete(obj) => self.on_delete(obj).await,
            WatchEvent::Generic(obj) => self.on_generic(obj),
        }
    }

    /// A ClusterQueue appeared: reference every flavor it lists, then register it.
    pub async fn on_create(&self, obj: &WatchedObject) -> bool {
        let Some(cq) = obj.as_cluster_queue() else {
            return true;
        };
        let name = cq.name_any();
        debug!(cluster_queue = %name, "ClusterQueue create event");

        if let Err(e) = self
            .references
            .sync(&name, &ClusterQueueSpec::default(), &cq.spec)
            .await
        {
            error!(
                cluster_queue = %name,
                error = %e,
                "Failed to update ResourceFlavor references"
            );
            return false;
        }

        if let Err(e) = self.cache.add_cluster_queue(cq) {
            warn!(cluster_queue = %name, error = %e, "Failed to add ClusterQueue to cache");
        }
        if let Err(e) = self.queues.add_cluster_queue(cq) {
            warn!(
                cluster_queue = %name,
                error = %e,
                "Failed to add ClusterQueue to queue manager"
            );
        }
        true
    }

    /// A ClusterQueue went away: drop its flavor references, then unregister it.
    pub async fn on_delete(&self, obj: &WatchedObject) -> bool {
        let Some(cq) = obj.as_cluster_queue() else {
            return true;
        };
        let name = cq.name_any();
        debug!(cluster_queue = %name, "ClusterQueue delete event");

        if let Err(e) = self
            .references
            .sync(&name, &cq.spec, &ClusterQueueSpec::default())
            .await
        {
            error!(
                cluster_queue = %name,
                error = %e,
                "Failed to remove ResourceFlavor references"
            );
            return false;
        }

        self.cache.delete_cluster_queue(cq);
        self.queues.delete_cluster_queue(cq);
        true
    }

    /// A ClusterQueue changed: move references if its resources changed, then refresh it.
    pub async fn on_update(&self, old: &WatchedObject, new: &WatchedObject) -> bool {
        let Some(cq) = new.as_cluster_queue() else {
            return true;
        };
        let name = cq.name_any();
        debug!(cluster_queue = %name, "ClusterQueue update event");

        if let Some(old_cq) = old.as_cluster_queue() {
            if resources_changed(old_cq, cq) {
                if let Err(e) = self.references.sync(&name, &old_cq.spec, &cq.spec).await {
                    error!(
                        cluster_queue = %name,
                        error = %e,
                        "Failed to update ResourceFlavor references"
                    );
                    return false;
                }
            }
        }

        if let Err(e) = self.cache.update_cluster_queue(cq) {
            warn!(cluster_queue = %name, error = %e, "Failed to update ClusterQueue in cache");
        }
        if let Err(e) = self.queues.update_cluster_queue(cq) {
            warn!(
                cluster_queue = %name,
                error = %e,
                "Failed to update ClusterQueue in queue manager"
            );
        }
        true
    }

    /// Bridged workload notifications are always admitted; only logged here.
    pub fn on_generic(&self, obj: &WatchedObject) -> bool {
        trace!(kind = %obj.kind(), object = %obj.name(), "Got generic event");
        true
    }
}

fn resources_changed(old: &ClusterQueue, new: &ClusterQueue) -> bool {
    old.spec.resources != new.spec.resources
}

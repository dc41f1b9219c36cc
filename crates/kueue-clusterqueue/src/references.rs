//! ResourceFlavor back-reference maintenance
//!
//! Each ResourceFlavor records which ClusterQueues list it. The set is kept
//! up to date incrementally from the difference between a ClusterQueue's
//! old and new spec. Writes are per flavor and best effort: a failed write
//! is logged and left for the next spec change to repair.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, warn};

use kueue_common::crd::{ClusterQueueSpec, ResourceFlavor};

use crate::store::ClusterQueueStore;
use crate::Error;

/// Flavors touched by one synchronization
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Flavors whose reference set was written
    pub updated: Vec<String>,
    /// Flavors named in the spec that do not exist
    pub missing: Vec<String>,
    /// Flavors whose write failed
    pub failed: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
enum Change {
    Remove,
    Add,
}

/// Applies the symmetric difference of two specs' flavor sets to the
/// ResourceFlavors' back-reference sets.
pub struct ReferenceSynchronizer {
    store: Arc<dyn ClusterQueueStore>,
}

impl ReferenceSynchronizer {
    /// Create a synchronizer writing through the given store
    pub fn new(store: Arc<dyn ClusterQueueStore>) -> Self {
        Self { store }
    }

    /// Move `cluster_queue`'s references from the flavors of `old` to those of `new`.
    ///
    /// Flavors only in `old` lose the reference, flavors only in `new` gain
    /// it, flavors in both are not touched. Fails only when the flavors
    /// cannot be listed, in which case nothing was written.
    pub async fn sync(
        &self,
        cluster_queue: &str,
        old: &ClusterQueueSpec,
        new: &ClusterQueueSpec,
    ) -> Result<SyncReport, Error> {
        let old_flavors = old.flavor_names();
        let new_flavors = new.flavor_names();
        let to_remove: BTreeSet<&String> = old_flavors.difference(&new_flavors).collect();
        let to_add: BTreeSet<&String> = new_flavors.difference(&old_flavors).collect();

        let mut report = SyncReport::default();
        if to_remove.is_empty() && to_add.is_empty() {
            return Ok(report);
        }

        let mut flavors: HashMap<String, ResourceFlavor> = self
            .store
            .list_resource_flavors()
            .await?
            .into_iter()
            .map(|rf| (rf.name_any(), rf))
            .collect();

        for name in to_remove {
            let rf = flavors.remove(name);
            self.apply(cluster_queue, name, rf, Change::Remove, &mut report)
                .await;
        }
        for name in to_add {
            let rf = flavors.remove(name);
            self.apply(cluster_queue, name, rf, Change::Add, &mut report)
                .await;
        }

        Ok(report)
    }

    async fn apply(
        &self,
        cluster_queue: &str,
        flavor: &str,
        rf: Option<ResourceFlavor>,
        change: Change,
        report: &mut SyncReport,
    ) {
        let Some(mut rf) = rf else {
            warn!(
                flavor = %flavor,
                cluster_queue = %cluster_queue,
                ?change,
                "ResourceFlavor does not exist, skipping reference update"
            );
            report.missing.push(flavor.to_string());
            return;
        };

        let changed = match change {
            Change::Remove => rf.spec.cluster_queues.remove(cluster_queue),
            Change::Add => rf.spec.cluster_queues.insert(cluster_queue.to_string()),
        };
        if !changed {
            debug!(
                flavor = %flavor,
                cluster_queue = %cluster_queue,
                ?change,
                "Reference already in place"
            );
            return;
        }

        match self.store.update_resource_flavor(&rf).await {
            Ok(()) => {
                debug!(
                    flavor = %flavor,
                    cluster_queue = %cluster_queue,
                    ?change,
                    "Updated ResourceFlavor reference"
                );
                report.updated.push(flavor.to_string());
            }
            Err(e) => {
                warn!(
                    flavor = %flavor,
                    cluster_queue = %cluster_queue,
                    ?change,
                    error = %e,
                    "Failed to update ResourceFlavor reference"
                );
                report.failed.push(flavor.to_string());
            }
        }
    }
}

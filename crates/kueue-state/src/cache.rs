//! Admission cache: per-ClusterQueue resource usage of admitted workloads

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use parking_lot::RwLock;
use tracing::debug;

use kueue_common::crd::{ClusterQueue, ClusterQueueSpec, Workload};
use kueue_common::quantity;

use crate::StateError;

/// Resource name to quantity in use
pub type UsedResources = BTreeMap<String, Quantity>;

/// Tracks the resources consumed by admitted workloads in each ClusterQueue.
///
/// Implementations must serialize concurrent mutation internally; callers
/// hold no locks and may call from any task.
pub trait ClusterQueueCache: Send + Sync {
    /// Start tracking a ClusterQueue
    fn add_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError>;

    /// Replace the tracked spec of a ClusterQueue
    fn update_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError>;

    /// Stop tracking a ClusterQueue; unknown queues are ignored
    fn delete_cluster_queue(&self, cq: &ClusterQueue);

    /// Resources in use and number of admitted workloads
    fn usage(&self, cq: &ClusterQueue) -> Result<(UsedResources, usize), StateError>;
}

#[derive(Debug)]
struct AdmittedWorkload {
    cluster_queue: String,
    requests: BTreeMap<String, i128>,
}

#[derive(Debug, Default)]
struct CacheState {
    cluster_queues: HashMap<String, ClusterQueueSpec>,
    workloads: HashMap<String, AdmittedWorkload>,
}

/// Lock-guarded in-memory cache fed by ClusterQueue and Workload events.
///
/// Admitted workloads are remembered even when their ClusterQueue is not
/// known yet and are counted as soon as it is added.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    state: RwLock<CacheState>,
}

impl InMemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a workload's admission, or forget it if it is no longer admitted
    pub fn add_or_update_workload(&self, wl: &Workload) -> Result<(), StateError> {
        let key = wl.key();
        let Some(cluster_queue) = wl.admitted_cluster_queue() else {
            self.state.write().workloads.remove(&key);
            return Ok(());
        };

        let requests = wl.total_requests_milli()?;
        debug!(workload = %key, cluster_queue = %cluster_queue, "Caching admitted workload");
        self.state.write().workloads.insert(
            key,
            AdmittedWorkload {
                cluster_queue: cluster_queue.to_string(),
                requests,
            },
        );
        Ok(())
    }

    /// Forget a workload
    pub fn delete_workload(&self, wl: &Workload) {
        self.state.write().workloads.remove(&wl.key());
    }
}

impl ClusterQueueCache for InMemoryCache {
    fn add_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError> {
        let name = cq.name_any();
        let mut state = self.state.write();
        if state.cluster_queues.contains_key(&name) {
            return Err(StateError::ClusterQueueAlreadyExists(name));
        }
        state.cluster_queues.insert(name, cq.spec.clone());
        Ok(())
    }

    fn update_cluster_queue(&self, cq: &ClusterQueue) -> Result<(), StateError> {
        let name = cq.name_any();
        let mut state = self.state.write();
        match state.cluster_queues.get_mut(&name) {
            Some(spec) => {
                *spec = cq.spec.clone();
                Ok(())
            }
            None => Err(StateError::ClusterQueueNotFound(name)),
        }
    }

    fn delete_cluster_queue(&self, cq: &ClusterQueue) {
        self.state.write().cluster_queues.remove(&cq.name_any());
    }

    fn usage(&self, cq: &ClusterQueue) -> Result<(UsedResources, usize), StateError> {
        let name = cq.name_any();
        let state = self.state.read();
        let spec = state
            .cluster_queues
            .get(&name)
            .ok_or_else(|| StateError::ClusterQueueNotFound(name.clone()))?;

        // Every resource offered by the queue is reported, even when unused
        let mut used: BTreeMap<String, i128> =
            spec.resources.iter().map(|r| (r.name.clone(), 0)).collect();
        let mut admitted = 0;
        for wl in state.workloads.values().filter(|w| w.cluster_queue == name) {
            admitted += 1;
            for (resource, milli) in &wl.requests {
                let total = used.entry(resource.clone()).or_default();
                *total = total
                    .checked_add(*milli)
                    .ok_or_else(|| StateError::UsageOverflow {
                        cluster_queue: name.clone(),
                        resource: resource.clone(),
                    })?;
            }
        }

        let used = used
            .into_iter()
            .map(|(resource, milli)| (resource, quantity::from_milli(milli)))
            .collect();
        Ok((used, admitted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kueue_common::crd::{Admission, Flavor, PodSet, Resource, WorkloadSpec};

    fn cluster_queue(name: &str, resources: &[&str]) -> ClusterQueue {
        ClusterQueue::new(
            name,
            ClusterQueueSpec {
                resources: resources
                    .iter()
                    .map(|r| Resource {
                        name: r.to_string(),
                        flavors: vec![Flavor {
                            name: "default".to_string(),
                            ..Default::default()
                        }],
                    })
                    .collect(),
                ..Default::default()
            },
        )
    }

    fn workload(name: &str, cpu: &str, admitted_to: Option<&str>) -> Workload {
        let mut wl = Workload::new(
            name,
            WorkloadSpec {
                queue_name: Some("team-a".to_string()),
                pod_sets: vec![PodSet {
                    name: "main".to_string(),
                    count: 2,
                    requests: BTreeMap::from([("cpu".to_string(), Quantity(cpu.to_string()))]),
                }],
                admission: admitted_to.map(|cq| Admission {
                    cluster_queue: cq.to_string(),
                    pod_set_flavors: vec![],
                }),
            },
        );
        wl.metadata.namespace = Some("default".to_string());
        wl
    }

    #[test]
    fn usage_of_unknown_queue_is_an_error() {
        let cache = InMemoryCache::new();
        let err = cache.usage(&cluster_queue("ghost", &["cpu"])).unwrap_err();
        assert!(matches!(err, StateError::ClusterQueueNotFound(name) if name == "ghost"));
    }

    #[test]
    fn empty_queue_reports_zero_for_each_offered_resource() {
        let cache = InMemoryCache::new();
        let cq = cluster_queue("team-a", &["cpu", "memory"]);
        cache.add_cluster_queue(&cq).unwrap();

        let (used, admitted) = cache.usage(&cq).unwrap();
        assert_eq!(admitted, 0);
        assert_eq!(used["cpu"], Quantity("0".to_string()));
        assert_eq!(used["memory"], Quantity("0".to_string()));
    }

    #[test]
    fn admitted_workloads_are_summed_per_queue() {
        let cache = InMemoryCache::new();
        let cq = cluster_queue("team-a", &["cpu"]);
        cache.add_cluster_queue(&cq).unwrap();

        cache
            .add_or_update_workload(&workload("a", "500m", Some("team-a")))
            .unwrap();
        cache
            .add_or_update_workload(&workload("b", "1", Some("team-a")))
            .unwrap();
        cache
            .add_or_update_workload(&workload("c", "4", Some("team-b")))
            .unwrap();
        cache
            .add_or_update_workload(&workload("d", "4", None))
            .unwrap();

        let (used, admitted) = cache.usage(&cq).unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(used["cpu"], Quantity("3".to_string()));
    }

    #[test]
    fn workload_losing_admission_is_forgotten() {
        let cache = InMemoryCache::new();
        let cq = cluster_queue("team-a", &["cpu"]);
        cache.add_cluster_queue(&cq).unwrap();
        cache
            .add_or_update_workload(&workload("a", "1", Some("team-a")))
            .unwrap();
        cache
            .add_or_update_workload(&workload("a", "1", None))
            .unwrap();

        assert_eq!(cache.usage(&cq).unwrap().1, 0);
    }

    #[test]
    fn workloads_admitted_before_queue_exists_are_counted_later() {
        let cache = InMemoryCache::new();
        cache
            .add_or_update_workload(&workload("early", "1", Some("team-a")))
            .unwrap();

        let cq = cluster_queue("team-a", &["cpu"]);
        cache.add_cluster_queue(&cq).unwrap();
        assert_eq!(cache.usage(&cq).unwrap().1, 1);
    }

    #[test]
    fn add_twice_and_update_unknown_fail() {
        let cache = InMemoryCache::new();
        let cq = cluster_queue("team-a", &["cpu"]);
        cache.add_cluster_queue(&cq).unwrap();
        assert!(matches!(
            cache.add_cluster_queue(&cq),
            Err(StateError::ClusterQueueAlreadyExists(_))
        ));
        assert!(matches!(
            cache.update_cluster_queue(&cluster_queue("other", &[])),
            Err(StateError::ClusterQueueNotFound(_))
        ));
    }

    #[test]
    fn delete_then_usage_fails() {
        let cache = InMemoryCache::new();
        let cq = cluster_queue("team-a", &["cpu"]);
        cache.add_cluster_queue(&cq).unwrap();
        cache.delete_cluster_queue(&cq);
        assert!(cache.usage(&cq).is_err());
    }

    #[test]
    fn update_changes_reported_resources() {
        let cache = InMemoryCache::new();
        cache
            .add_cluster_queue(&cluster_queue("team-a", &["cpu"]))
            .unwrap();
        let updated = cluster_queue("team-a", &["cpu", "nvidia.com/gpu"]);
        cache.update_cluster_queue(&updated).unwrap();

        let (used, _) = cache.usage(&updated).unwrap();
        assert!(used.contains_key("nvidia.com/gpu"));
    }

    #[test]
    fn usage_beyond_representable_range_is_an_error() {
        let cache = InMemoryCache::new();
        let cq = cluster_queue("team-a", &["cpu"]);
        cache.add_cluster_queue(&cq).unwrap();
        // Each workload alone fits; their sum does not
        for name in ["a", "b"] {
            cache
                .add_or_update_workload(&workload(name, "5e34", Some("team-a")))
                .unwrap();
        }

        let err = cache.usage(&cq).unwrap_err();
        assert!(matches!(
            err,
            StateError::UsageOverflow { cluster_queue, resource }
                if cluster_queue == "team-a" && resource == "cpu"
        ));
    }

    #[test]
    fn invalid_workload_requests_are_rejected() {
        let cache = InMemoryCache::new();
        let err = cache
            .add_or_update_workload(&workload("bad", "many", Some("team-a")))
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidWorkload(_)));
    }
}

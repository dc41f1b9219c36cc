//! Workload watch feeding the admission cache, the queue manager, and the
//! ClusterQueue controller's workload channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kueue_clusterqueue::ClusterQueueReconciler;
use kueue_common::crd::Workload;
use kueue_common::UPDATES_BATCH_PERIOD;
use kueue_state::{InMemoryCache, InMemoryQueueManager, QueueManager};

/// Follow-up for the ClusterQueue controller after a workload event
#[derive(Debug, Clone)]
pub enum FeedAction {
    /// Push the workload through the workload channel
    Notify(Arc<Workload>),
    /// Re-queue a ClusterQueue directly; used when the workload that
    /// pointed at it is already gone from the queue manager
    Requeue(String),
}

/// Applies Workload watch events to the in-memory state
pub struct WorkloadFeed {
    cache: Arc<InMemoryCache>,
    queues: Arc<InMemoryQueueManager>,
    known: HashMap<String, Arc<Workload>>,
    relist: Option<HashSet<String>>,
}

impl WorkloadFeed {
    /// Create a feed that has seen no workloads yet
    pub fn new(cache: Arc<InMemoryCache>, queues: Arc<InMemoryQueueManager>) -> Self {
        Self {
            cache,
            queues,
            known: HashMap::new(),
            relist: None,
        }
    }

    /// Apply one watcher event to the cache and queue manager.
    ///
    /// Returns the follow-ups for the ClusterQueue controller. Workloads
    /// missing from a completed re-list are treated as deleted.
    pub fn apply_event(&mut self, event: Event<Workload>) -> Vec<FeedAction> {
        match event {
            Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(wl) => {
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(wl.key());
                }
                self.upsert(wl)
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return Vec::new();
                };
                let gone: Vec<Arc<Workload>> = self
                    .known
                    .iter()
                    .filter(|(key, _)| !seen.contains(*key))
                    .map(|(_, wl)| wl.clone())
                    .collect();
                gone.into_iter().flat_map(|wl| self.remove(&wl)).collect()
            }
            Event::Apply(wl) => self.upsert(wl),
            Event::Delete(wl) => self.remove(&wl),
        }
    }

    fn upsert(&mut self, wl: Workload) -> Vec<FeedAction> {
        let new = Arc::new(wl);
        let key = new.key();
        let old = self.known.insert(key.clone(), new.clone());

        let mut actions = Vec::new();
        // Leaving a queue: point the previous owner at a recount
        if let Some(old) = &old {
            if owner_changed(old, &new) {
                match old.admitted_cluster_queue() {
                    Some(_) => actions.push(FeedAction::Notify(old.clone())),
                    None => {
                        if let Some(cq) = self.queues.cluster_queue_for_workload(old) {
                            actions.push(FeedAction::Requeue(cq));
                        }
                    }
                }
            }
        }

        if let Err(e) = self.cache.add_or_update_workload(&new) {
            warn!(workload = %key, error = %e, "Failed to cache workload");
        }
        self.queues.add_or_update_workload(&new);
        actions.push(FeedAction::Notify(new));
        actions
    }

    fn remove(&mut self, wl: &Workload) -> Vec<FeedAction> {
        let key = wl.key();
        let last = self
            .known
            .remove(&key)
            .unwrap_or_else(|| Arc::new(wl.clone()));

        let action = match last.admitted_cluster_queue() {
            Some(_) => Some(FeedAction::Notify(last.clone())),
            None => self
                .queues
                .cluster_queue_for_workload(&last)
                .map(FeedAction::Requeue),
        };

        self.cache.delete_workload(&last);
        self.queues.delete_workload(&last);
        debug!(workload = %key, "Workload removed");
        action.into_iter().collect()
    }
}

fn owner_changed(old: &Workload, new: &Workload) -> bool {
    old.spec.queue_name != new.spec.queue_name
        || old.admitted_cluster_queue() != new.admitted_cluster_queue()
}

/// Watch Workloads in every namespace until `shutdown` fires
pub async fn watch_workloads(
    api: Api<Workload>,
    config: watcher::Config,
    mut feed: WorkloadFeed,
    reconciler: Arc<ClusterQueueReconciler>,
    shutdown: CancellationToken,
) {
    let stream = watcher::watcher(api, config).default_backoff();
    let mut stream = std::pin::pin!(stream);
    info!("Workload watcher started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(error = %e, "Workload watcher error, will retry");
                    continue;
                }
                None => break,
            },
        };

        for action in feed.apply_event(event) {
            match action {
                FeedAction::Notify(wl) => reconciler.notify_workload_update(wl).await,
                FeedAction::Requeue(cq) => {
                    reconciler.queue().add_after(&cq, UPDATES_BATCH_PERIOD)
                }
            }
        }
    }

    info!("Workload watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kueue_common::crd::{Admission, ClusterQueue, ClusterQueueSpec, PodSet, WorkloadSpec};
    use kueue_state::ClusterQueueCache;
    use std::collections::BTreeMap;

    fn workload(name: &str, queue: &str, admitted_to: Option<&str>) -> Workload {
        let mut wl = Workload::new(
            name,
            WorkloadSpec {
                queue_name: Some(queue.to_string()),
                pod_sets: vec![PodSet {
                    name: "main".to_string(),
                    count: 2,
                    requests: BTreeMap::from([("cpu".to_string(), Quantity("500m".to_string()))]),
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

    fn feed() -> (WorkloadFeed, Arc<InMemoryCache>, Arc<InMemoryQueueManager>) {
        let cache = Arc::new(InMemoryCache::new());
        let queues = Arc::new(InMemoryQueueManager::new());
        for name in ["team-a", "team-b"] {
            let cq = ClusterQueue::new(name, ClusterQueueSpec::default());
            cache.add_cluster_queue(&cq).unwrap();
            queues.add_cluster_queue(&cq).unwrap();
        }
        (WorkloadFeed::new(cache.clone(), queues.clone()), cache, queues)
    }

    fn cq(name: &str) -> ClusterQueue {
        ClusterQueue::new(name, ClusterQueueSpec::default())
    }

    fn notified(actions: &[FeedAction]) -> Vec<String> {
        actions
            .iter()
            .map(|a| match a {
                FeedAction::Notify(wl) => format!("notify {}", wl.key()),
                FeedAction::Requeue(cq) => format!("requeue {cq}"),
            })
            .collect()
    }

    #[test]
    fn pending_workload_is_counted_and_notified() {
        let (mut feed, _, queues) = feed();
        let actions = feed.apply_event(Event::Apply(workload("job", "team-a", None)));

        assert_eq!(notified(&actions), ["notify default/job"]);
        assert_eq!(queues.pending(&cq("team-a")), 1);
    }

    #[test]
    fn admission_moves_workload_from_pending_to_cache() {
        let (mut feed, cache, queues) = feed();
        feed.apply_event(Event::Apply(workload("job", "team-a", None)));
        feed.apply_event(Event::Apply(workload("job", "team-a", Some("team-a"))));

        assert_eq!(queues.pending(&cq("team-a")), 0);
        let (used, admitted) = cache.usage(&cq("team-a")).unwrap();
        assert_eq!(admitted, 1);
        assert_eq!(used["cpu"], Quantity("1".to_string()));
    }

    #[test]
    fn switching_queues_requeues_the_previous_one() {
        let (mut feed, _, queues) = feed();
        feed.apply_event(Event::Apply(workload("job", "team-a", None)));
        let actions = feed.apply_event(Event::Apply(workload("job", "team-b", None)));

        assert_eq!(notified(&actions), ["requeue team-a", "notify default/job"]);
        assert_eq!(queues.pending(&cq("team-a")), 0);
        assert_eq!(queues.pending(&cq("team-b")), 1);
    }

    #[test]
    fn deleting_pending_workload_requeues_its_queue() {
        let (mut feed, _, queues) = feed();
        let wl = workload("job", "team-a", None);
        feed.apply_event(Event::Apply(wl.clone()));

        let actions = feed.apply_event(Event::Delete(wl));
        assert_eq!(notified(&actions), ["requeue team-a"]);
        assert_eq!(queues.pending(&cq("team-a")), 0);
    }

    #[test]
    fn deleting_admitted_workload_notifies_and_frees_usage() {
        let (mut feed, cache, _) = feed();
        let wl = workload("job", "team-a", Some("team-a"));
        feed.apply_event(Event::Apply(wl.clone()));

        let actions = feed.apply_event(Event::Delete(wl));
        assert_eq!(notified(&actions), ["notify default/job"]);
        assert_eq!(cache.usage(&cq("team-a")).unwrap().1, 0);
    }

    #[test]
    fn workloads_missing_from_relist_are_removed() {
        let (mut feed, _, queues) = feed();
        feed.apply_event(Event::Apply(workload("kept", "team-a", None)));
        feed.apply_event(Event::Apply(workload("gone", "team-a", None)));

        feed.apply_event(Event::Init);
        feed.apply_event(Event::InitApply(workload("kept", "team-a", None)));
        let actions = feed.apply_event(Event::InitDone);

        assert_eq!(notified(&actions), ["requeue team-a"]);
        assert_eq!(queues.pending(&cq("team-a")), 1);
    }
}

//! ClusterQueue watch source
//!
//! The kube watcher reports applies and deletes but not whether an apply is
//! a create or an update. [`ClusterQueueSource`] remembers the last version
//! of every ClusterQueue it has seen to tell them apart, and turns objects
//! that vanish across a re-list into deletes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kueue_common::crd::ClusterQueue;

use crate::controller::ClusterQueueReconciler;
use crate::event::{WatchEvent, WatchedObject};

/// Tracks watched ClusterQueues and classifies watcher events
#[derive(Debug, Default)]
pub struct ClusterQueueSource {
    known: HashMap<String, Arc<ClusterQueue>>,
    relist: Option<HashSet<String>>,
}

impl ClusterQueueSource {
    /// Create a source that has seen nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every ClusterQueue currently known
    pub fn known_names(&self) -> Vec<String> {
        self.known.keys().cloned().collect()
    }

    /// Classify one watcher event into zero or more gate notifications
    pub fn translate(&mut self, event: Event<ClusterQueue>) -> Vec<WatchEvent> {
        match event {
            Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(cq) => {
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(cq.name_any());
                }
                self.apply(cq).into_iter().collect()
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|name| !seen.contains(*name))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|name| self.known.remove(&name))
                    .map(|cq| WatchEvent::Delete(WatchedObject::ClusterQueue(cq)))
                    .collect()
            }
            Event::Apply(cq) => self.apply(cq).into_iter().collect(),
            Event::Delete(cq) => {
                let name = cq.name_any();
                let last = self.known.remove(&name).unwrap_or_else(|| Arc::new(cq));
                vec![WatchEvent::Delete(WatchedObject::ClusterQueue(last))]
            }
        }
    }

    fn apply(&mut self, cq: ClusterQueue) -> Option<WatchEvent> {
        let new = Arc::new(cq);
        match self.known.insert(new.name_any(), new.clone()) {
            None => Some(WatchEvent::Create(WatchedObject::ClusterQueue(new))),
            // Re-list of an unchanged object
            Some(old)
                if old.resource_version().is_some()
                    && old.resource_version() == new.resource_version() =>
            {
                None
            }
            Some(old) => Some(WatchEvent::Update {
                old: WatchedObject::ClusterQueue(old),
                new: WatchedObject::ClusterQueue(new),
            }),
        }
    }
}

/// Feed ClusterQueue watch events through the reconciler's gate until `shutdown` fires.
///
/// With `resync` set, every known ClusterQueue is re-queued on that period so
/// status drift not signalled by any event is eventually corrected.
pub async fn watch_cluster_queues(
    api: Api<ClusterQueue>,
    config: watcher::Config,
    reconciler: Arc<ClusterQueueReconciler>,
    resync: Option<Duration>,
    shutdown: CancellationToken,
) {
    let mut source = ClusterQueueSource::new();
    let stream = watcher::watcher(api, config).default_backoff();
    let mut stream = std::pin::pin!(stream);

    let mut resync_interval = tokio::time::interval(resync.unwrap_or(Duration::from_secs(3600)));
    resync_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the initial list already enqueues everything
    resync_interval.tick().await;

    info!("ClusterQueue watcher started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    for notification in source.translate(event) {
                        reconciler.handle_event(notification).await;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "ClusterQueue watcher error, will retry"),
                None => break,
            },
            _ = resync_interval.tick(), if resync.is_some() => {
                let names = source.known_names();
                debug!(count = names.len(), "Re-queueing known ClusterQueues");
                for name in names {
                    reconciler.queue().add(&name);
                }
            }
        }
    }

    info!("ClusterQueue watcher stopped");
}

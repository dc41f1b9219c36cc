//! ClusterQueue controller
//!
//! Keeps three sources of truth in step:
//! - the persisted ClusterQueue status (used resources, admitted/pending counts)
//! - the admission cache and queue manager, updated as ClusterQueue events arrive
//! - the back-reference set on each ResourceFlavor a ClusterQueue lists
//!
//! Cache and queue manager mutations happen when an event is admitted by the
//! [`EventGate`], before the ClusterQueue name is enqueued, so the reconcile
//! body only reads derived status and writes it back when it changed.
//! Workload changes arrive through a bounded channel and are turned into
//! debounced reconcile requests for the owning ClusterQueue.

#![deny(missing_docs)]

mod bridge;
mod controller;
mod error;
mod event;
mod gate;
mod references;
mod source;
mod status;
mod store;
mod workqueue;

pub use bridge::{
    workload_update_channel, WorkloadHandler, WorkloadUpdateSender, WORKLOAD_UPDATE_BUFFER,
};
pub use controller::{ClusterQueueReconciler, ReconcileOutcome};
pub use error::Error;
pub use event::{WatchEvent, WatchedObject};
pub use gate::EventGate;
pub use references::{ReferenceSynchronizer, SyncReport};
pub use source::{watch_cluster_queues, ClusterQueueSource};
pub use status::StatusComputer;
pub use store::{ClusterQueueStore, KubeStore};
pub use workqueue::WorkQueue;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

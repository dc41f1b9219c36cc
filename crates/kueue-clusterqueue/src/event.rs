//! Watch notifications delivered to the event gate

use std::sync::Arc;

use kube::ResourceExt;

use kueue_common::crd::{ClusterQueue, Workload};

/// Payload of a watch notification
#[derive(Clone, Debug)]
pub enum WatchedObject {
    /// The controller's primary resource
    ClusterQueue(Arc<ClusterQueue>),
    /// A workload bridged in from the workload channel
    Workload(Arc<Workload>),
    /// Any other kind; passes through the gate unexamined
    Other {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },
}

impl WatchedObject {
    /// Kind of the payload
    pub fn kind(&self) -> &str {
        match self {
            WatchedObject::ClusterQueue(_) => "ClusterQueue",
            WatchedObject::Workload(_) => "Workload",
            WatchedObject::Other { kind, .. } => kind,
        }
    }

    /// Name of the payload (`namespace/name` for workloads)
    pub fn name(&self) -> String {
        match self {
            WatchedObject::ClusterQueue(cq) => cq.name_any(),
            WatchedObject::Workload(wl) => wl.key(),
            WatchedObject::Other { name, .. } => name.clone(),
        }
    }

    /// The ClusterQueue payload, if this is one
    pub fn as_cluster_queue(&self) -> Option<&Arc<ClusterQueue>> {
        match self {
            WatchedObject::ClusterQueue(cq) => Some(cq),
            _ => None,
        }
    }
}

/// A create, update, delete, or generic notification
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// First sighting of an object
    Create(WatchedObject),
    /// An object changed
    Update {
        /// Previous version
        old: WatchedObject,
        /// Current version
        new: WatchedObject,
    },
    /// An object was deleted
    Delete(WatchedObject),
    /// Out-of-band notification from a channel source
    Generic(WatchedObject),
}

impl WatchEvent {
    /// The object the event is about (the new version for updates)
    pub fn object(&self) -> &WatchedObject {
        match self {
            WatchEvent::Create(obj) | WatchEvent::Delete(obj) | WatchEvent::Generic(obj) => obj,
            WatchEvent::Update { new, .. } => new,
        }
    }
}

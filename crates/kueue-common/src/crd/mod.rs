//! Custom Resource Definitions for kueue
//!
//! This module contains the CRDs the ClusterQueue controller reads and writes.

mod cluster_queue;
mod resource_flavor;
mod workload;

pub use cluster_queue::{
    ClusterQueue, ClusterQueueSpec, ClusterQueueStatus, Flavor, QueueingStrategy, Quota, Resource,
};
pub use resource_flavor::{ResourceFlavor, ResourceFlavorSpec};
pub use workload::{Admission, PodSet, PodSetFlavors, Workload, WorkloadSpec};

//! ClusterQueue CRD types
//!
//! A ClusterQueue is a cluster-scoped pool of quota. Each resource it offers
//! is split across one or more ResourceFlavors; the status reports what the
//! admitted workloads currently use and how many are still waiting.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quantity;

/// Specification for a ClusterQueue
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kueue.x-k8s.io",
    version = "v1alpha1",
    kind = "ClusterQueue",
    plural = "clusterqueues",
    shortname = "cq",
    status = "ClusterQueueStatus",
    printcolumn = r#"{"name":"Cohort","type":"string","jsonPath":".spec.cohort"}"#,
    printcolumn = r#"{"name":"Admitted","type":"integer","jsonPath":".status.admittedWorkloads"}"#,
    printcolumn = r#"{"name":"Pending","type":"integer","jsonPath":".status.pendingWorkloads"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueSpec {
    /// Resources offered by this queue, each split across flavors
    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Cohort this queue borrows unused quota from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,

    /// Ordering strategy for pending workloads
    #[serde(default)]
    pub queueing_strategy: QueueingStrategy,
}

/// A single resource (e.g. `cpu`) and the flavors that provide it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource name, e.g. `cpu`, `memory`, `nvidia.com/gpu`
    pub name: String,

    /// Flavors this resource may draw from, in preference order
    #[serde(default)]
    pub flavors: Vec<Flavor>,
}

/// Quota of one resource within one ResourceFlavor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flavor {
    /// Name of the referenced ResourceFlavor
    pub name: String,

    /// Quota for this flavor
    #[serde(default)]
    pub quota: Quota,
}

/// Guaranteed and borrowing limits for a flavor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Quantity guaranteed to this queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Quantity>,

    /// Upper bound including borrowed quota
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Quantity>,
}

/// Ordering of pending workloads inside a ClusterQueue
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum QueueingStrategy {
    /// Strict first-in first-out by creation time
    #[default]
    StrictFIFO,
    /// FIFO, but workloads that don't fit don't block the head
    BestEffortFIFO,
}

/// Status of a ClusterQueue, derived from the cache and queue manager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueStatus {
    /// Resources in use by admitted workloads, keyed by resource name
    #[serde(default)]
    pub used_resources: BTreeMap<String, Quantity>,

    /// Number of workloads admitted to this queue
    #[serde(default)]
    pub admitted_workloads: i32,

    /// Number of workloads waiting in this queue
    #[serde(default)]
    pub pending_workloads: i32,
}

impl ClusterQueueStatus {
    /// Compare statuses by meaning rather than representation.
    ///
    /// Quantities compare by value, so `"1"` and `"1000m"` are equal.
    pub fn semantic_eq(&self, other: &ClusterQueueStatus) -> bool {
        self.admitted_workloads == other.admitted_workloads
            && self.pending_workloads == other.pending_workloads
            && quantity::resource_map_eq(&self.used_resources, &other.used_resources)
    }
}

impl ClusterQueueSpec {
    /// All flavor names referenced by any resource in this spec
    pub fn flavor_names(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .flat_map(|r| r.flavors.iter().map(|f| f.name.clone()))
            .collect()
    }
}

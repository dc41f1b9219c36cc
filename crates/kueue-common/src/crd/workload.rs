//! Workload CRD types
//!
//! A Workload is a unit of work queued to a ClusterQueue. Once the scheduler
//! admits it, `spec.admission` names the ClusterQueue it was admitted to and
//! the flavors chosen for each pod set.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quantity;
use crate::Error;

/// Specification for a Workload
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kueue.x-k8s.io",
    version = "v1alpha1",
    kind = "Workload",
    plural = "workloads",
    shortname = "wl",
    namespaced,
    printcolumn = r#"{"name":"Queue","type":"string","jsonPath":".spec.queueName"}"#,
    printcolumn = r#"{"name":"Admitted by","type":"string","jsonPath":".spec.admission.clusterQueue"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// ClusterQueue this workload is queued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    /// Groups of identical pods and their requests
    #[serde(default)]
    pub pod_sets: Vec<PodSet>,

    /// Set once the workload has been admitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<Admission>,
}

/// A group of identical pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSet {
    /// Pod set name, unique within the workload
    pub name: String,

    /// Number of pods in the set
    #[serde(default = "default_count")]
    pub count: i32,

    /// Per-pod resource requests
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

fn default_count() -> i32 {
    1
}

/// Admission record written by the scheduler
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    /// ClusterQueue the workload was admitted to
    pub cluster_queue: String,

    /// Flavors assigned to each pod set
    #[serde(default)]
    pub pod_set_flavors: Vec<PodSetFlavors>,
}

/// Flavor assignment for one pod set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSetFlavors {
    /// Name of the pod set
    pub name: String,

    /// Resource name to flavor name
    #[serde(default)]
    pub flavors: BTreeMap<String, String>,
}

impl Workload {
    /// `namespace/name` key identifying this workload
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// ClusterQueue the workload was admitted to, if any
    pub fn admitted_cluster_queue(&self) -> Option<&str> {
        self.spec
            .admission
            .as_ref()
            .map(|a| a.cluster_queue.as_str())
    }

    /// Total requests across all pod sets, in milli-units per resource
    pub fn total_requests_milli(&self) -> Result<BTreeMap<String, i128>, Error> {
        let mut totals: BTreeMap<String, i128> = BTreeMap::new();
        for ps in &self.spec.pod_sets {
            for (resource, qty) in &ps.requests {
                let per_pod = quantity::parse_milli(&qty.0).map_err(|_| {
                    Error::validation_for(
                        self.key(),
                        format!(
                            "pod set '{}' requests invalid {} quantity '{}'",
                            ps.name, resource, qty.0
                        ),
                    )
                })?;
                let total = totals.entry(resource.clone()).or_default();
                *total = per_pod
                    .checked_mul(i128::from(ps.count))
                    .and_then(|requested| total.checked_add(requested))
                    .ok_or_else(|| {
                        Error::validation_for(
                            self.key(),
                            format!("total {} requests overflow", resource),
                        )
                    })?;
            }
        }
        Ok(totals)
    }
}

//! ResourceFlavor CRD types
//!
//! A ResourceFlavor names a variant of capacity (spot vs on-demand, a GPU
//! model, ...). It keeps a back-reference set of the ClusterQueues whose
//! spec lists it, maintained by the ClusterQueue controller.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Taint;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a ResourceFlavor
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kueue.x-k8s.io",
    version = "v1alpha1",
    kind = "ResourceFlavor",
    plural = "resourceflavors",
    shortname = "rf",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFlavorSpec {
    /// Node labels that identify nodes of this flavor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Taints carried by nodes of this flavor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// ClusterQueues whose spec references this flavor
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub cluster_queues: BTreeSet<String>,
}

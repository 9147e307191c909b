//! ClusterSubnetState CRD
//!
//! Cluster-wide subnet health signal. The status is written by the cluster
//! control plane; the agent only reads the exhaustion flag to switch the pool
//! scaler into its conservative mode.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "acn.azure.com",
    version = "v1alpha1",
    kind = "ClusterSubnetState",
    namespaced,
    status = "ClusterSubnetStateStatus",
    shortname = "css"
)]
pub struct ClusterSubnetStateSpec {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSubnetStateStatus {
    /// Whether the subnet has run out of allocatable IPs.
    #[serde(default)]
    pub exhausted: bool,

    /// When the control plane last evaluated the subnet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

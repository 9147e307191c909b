//! NodeNetworkConfig CRD
//!
//! The node-scoped contract between the agent and the cluster-wide IP
//! allocator. The spec is written by the agent and carries the node's desired
//! pool size plus the IPs it no longer uses; the status is written by the
//! allocator and carries the scaler parameters and the network containers
//! delegated to the node.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "acn.azure.com",
    version = "v1alpha",
    kind = "NodeNetworkConfig",
    namespaced,
    status = "NodeNetworkConfigStatus",
    shortname = "nnc"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigSpec {
    /// Number of IPs the node wants delegated from the cluster allocator.
    #[serde(default, rename = "requestedIPCount")]
    pub requested_ip_count: i64,

    /// IDs of delegated IPs the node no longer uses. The allocator is free to
    /// reclaim any of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips_not_in_use: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigStatus {
    /// Scaling parameters the allocator wants this node to honor.
    #[serde(default)]
    pub scaler: Scaler,

    /// Network containers delegated to the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_containers: Vec<NetworkContainer>,
}

/// IP request scaling parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scaler {
    /// Minimum unit of pool growth or shrink, in IPs.
    #[serde(default)]
    pub batch_size: i64,

    /// Free-IP percentage of a batch above which the pool should shrink.
    #[serde(default)]
    pub release_threshold_percent: i64,

    /// Free-IP percentage of a batch below which the pool should grow.
    #[serde(default)]
    pub request_threshold_percent: i64,

    /// Hard cap on the pool size.
    #[serde(default, rename = "maxIPCount")]
    pub max_ip_count: i64,
}

/// A network container delegated to this node by the allocator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkContainer {
    #[serde(default)]
    pub id: String,

    #[serde(default, rename = "type")]
    pub nc_type: NcType,

    /// Primary IP of the container. A bare address for vnet containers, a
    /// CIDR prefix for vnet-block containers.
    #[serde(default, rename = "primaryIP")]
    pub primary_ip: String,

    #[serde(default)]
    pub subnet_name: String,

    #[serde(default)]
    pub subnet_address_space: String,

    #[serde(default, rename = "subscriptionID")]
    pub subscription_id: String,

    #[serde(default, rename = "resourceGroupID")]
    pub resource_group_id: String,

    #[serde(default, rename = "vnetID")]
    pub vnet_id: String,

    #[serde(default, rename = "subnetID")]
    pub subnet_id: String,

    /// Version of the container the allocator has published. IPs delegated at
    /// a newer version than the dataplane has programmed are not yet usable.
    #[serde(default)]
    pub version: i64,
}

/// Network container assignment mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NcType {
    /// Unset; treated the same as vnet.
    #[default]
    #[serde(rename = "")]
    Unspecified,

    #[serde(rename = "vnet")]
    Vnet,

    #[serde(rename = "vnetBlock")]
    VnetBlock,
}

//! Node IPAM agent CRD definitions
//!
//! Kubernetes Custom Resource Definitions shared by the agent:
//! - NodeNetworkConfig: the per-node IP pool contract with the allocator
//! - ClusterSubnetState: the cluster-wide subnet exhaustion signal

pub mod cluster_subnet_state;
pub mod node_network_config;

// Re-exports
pub use cluster_subnet_state::*;
pub use node_network_config::*;

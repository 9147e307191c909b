//! Test utilities for the lifecycle and monitor tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crds::{NetworkContainer, NodeNetworkConfig, NodeNetworkConfigSpec, NodeNetworkConfigStatus, Scaler};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::lifecycle::{IpConfigStatus, IpState, IpStateService};

/// Builds a test IP config in the given state. The address is derived from
/// the numeric suffix so every fixture IP is distinct.
pub fn test_ip(id: &str, suffix: u8, state: IpState) -> IpConfigStatus {
    IpConfigStatus {
        id: id.to_string(),
        address: IpAddr::V4(Ipv4Addr::new(10, 240, 0, suffix)),
        nc_id: "nc-0".to_string(),
        nc_version: 0,
        state,
        owner: None,
    }
}

/// Builds a service seeded through its public API: `available` Available
/// IPs, `assigned` IPs assigned to pods pod-0..n, `pending_programming` and
/// `pending_release` IPs in those states.
pub fn seeded_service(
    available: usize,
    assigned: usize,
    pending_programming: usize,
    pending_release: usize,
) -> Arc<IpStateService> {
    let service = Arc::new(IpStateService::new());
    let mut suffix = 0u8;
    let mut ips = Vec::new();
    for i in 0..(available + assigned) {
        ips.push(test_ip(&format!("avail-{i}"), suffix, IpState::Available));
        suffix += 1;
    }
    for i in 0..pending_programming {
        ips.push(test_ip(
            &format!("prog-{i}"),
            suffix,
            IpState::PendingProgramming,
        ));
        suffix += 1;
    }
    for i in 0..pending_release {
        ips.push(test_ip(
            &format!("rel-{i}"),
            suffix,
            IpState::PendingRelease,
        ));
        suffix += 1;
    }
    service.apply_ip_configs(ips);
    for i in 0..assigned {
        service
            .assign(&format!("pod-{i}"), None)
            .expect("seeded pool has capacity");
    }
    service
}

/// Builds a NodeNetworkConfig with the given spec values and scaler.
pub fn test_nnc(requested: i64, ips_not_in_use: Vec<String>, scaler: Scaler) -> NodeNetworkConfig {
    NodeNetworkConfig {
        metadata: ObjectMeta {
            name: Some("test-node".to_string()),
            namespace: Some("kube-system".to_string()),
            ..Default::default()
        },
        spec: NodeNetworkConfigSpec {
            requested_ip_count: requested,
            ips_not_in_use,
        },
        status: Some(NodeNetworkConfigStatus {
            scaler,
            network_containers: vec![NetworkContainer {
                id: "nc-0".to_string(),
                subnet_name: "podnet".to_string(),
                subnet_address_space: "10.240.0.0/16".to_string(),
                ..Default::default()
            }],
        }),
    }
}

/// The scaler used by most scenarios: batch 16, buffer 0.5, max 250.
pub fn default_scaler() -> Scaler {
    Scaler {
        batch_size: 16,
        request_threshold_percent: 50,
        release_threshold_percent: 150,
        max_ip_count: 250,
    }
}

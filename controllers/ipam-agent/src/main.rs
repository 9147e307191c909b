//! Node IPAM agent
//!
//! Brokers IP addresses between the cluster-wide allocator and locally
//! scheduled pods:
//! - the IP lifecycle manager tracks every delegated IP through
//!   Available / Assigned / PendingProgramming / PendingRelease
//! - the pool monitor resizes the node's pool by publishing a desired spec
//!   (requested IP count + IPs not in use) to the NodeNetworkConfig CRD
//! - ClusterSubnetState exhaustion signals flip the scaler into its
//!   conservative mode

mod agent;
mod error;
mod lifecycle;
#[cfg(test)]
mod lifecycle_test;
mod metrics;
mod monitor;
mod pool;
#[cfg(test)]
mod test_utils;
mod watcher;

use std::env;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::{Agent, AgentConfig};
use crate::error::AgentError;
use crate::monitor::{DEFAULT_MAX_IPS, DEFAULT_REFRESH_DELAY};

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt::init();

    info!("starting node IPAM agent");

    let node_name = env::var("NODE_NAME").map_err(|_| {
        AgentError::Config("NODE_NAME environment variable is required".to_string())
    })?;
    let namespace = env::var("POD_NAMESPACE").unwrap_or_else(|_| "kube-system".to_string());
    let refresh_delay = env::var("IPAM_REFRESH_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REFRESH_DELAY);
    let max_ips = env::var("IPAM_MAX_IPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_IPS);

    info!("configuration:");
    info!("  node: {node_name}");
    info!("  namespace: {namespace}");
    info!("  refresh delay: {refresh_delay:?}");
    info!("  max IPs: {max_ips}");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let agent = Agent::new(
        AgentConfig {
            node_name,
            namespace,
            refresh_delay,
            max_ips,
        },
        shutdown,
    )
    .await?;
    agent.run().await
}

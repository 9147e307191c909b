//! Agent wiring.
//!
//! Builds the Kubernetes client and API handles, recovers boot state from the
//! node's existing NodeNetworkConfig, and runs the watchers and the pool
//! monitor until shutdown.

use std::sync::Arc;
use std::time::Duration;

use crds::{ClusterSubnetState, NodeNetworkConfig};
use kube::{Api, Client};
use nnc_client::NncClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::lifecycle::IpStateService;
use crate::monitor::{MonitorOptions, PoolMonitor};
use crate::watcher::{ClusterSubnetStateWatcher, NodeNetworkConfigWatcher};

/// Field manager identity for the agent's server-side-apply writes.
const FIELD_MANAGER: &str = "ipam-agent";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Node name; also the name of the node's NodeNetworkConfig.
    pub node_name: String,
    /// Namespace the NodeNetworkConfig and ClusterSubnetState live in.
    pub namespace: String,
    pub refresh_delay: Duration,
    pub max_ips: i64,
}

/// The running agent: the pool monitor plus its resource watchers.
pub struct Agent {
    monitor: JoinHandle<Result<(), AgentError>>,
    nnc_watcher: JoinHandle<Result<(), AgentError>>,
    css_watcher: JoinHandle<Result<(), AgentError>>,
}

impl Agent {
    /// Creates and starts the agent tasks.
    pub async fn new(config: AgentConfig, shutdown: CancellationToken) -> Result<Self, AgentError> {
        info!(node = %config.node_name, namespace = %config.namespace, "initializing IPAM agent");

        let client = Client::try_default().await?;
        let nnc_api: Api<NodeNetworkConfig> = Api::namespaced(client.clone(), &config.namespace);
        let css_api: Api<ClusterSubnetState> = Api::namespaced(client.clone(), &config.namespace);

        let ips = Arc::new(IpStateService::new());
        let publisher = NncClient::new(nnc_api.clone(), &config.node_name, FIELD_MANAGER);

        // Boot-time recovery: IPs the previous incarnation promised to the
        // allocator stay promised.
        match publisher.get().await {
            Ok(nnc) if !nnc.spec.ips_not_in_use.is_empty() => {
                info!(
                    count = nnc.spec.ips_not_in_use.len(),
                    "re-marking IPs promised to the allocator before restart"
                );
                ips.mark_existing_as_pending(&nnc.spec.ips_not_in_use)?;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "no existing NodeNetworkConfig found at startup");
            }
        }

        let (monitor, handle) = PoolMonitor::new(
            ips,
            publisher,
            MonitorOptions {
                refresh_delay: config.refresh_delay,
                max_ips: config.max_ips,
            },
        );

        let monitor = tokio::spawn(monitor.start(shutdown));

        let nnc_watcher = {
            let watcher =
                NodeNetworkConfigWatcher::new(nnc_api, config.node_name.clone(), handle.clone());
            tokio::spawn(async move { watcher.watch().await })
        };

        let css_watcher = {
            let watcher = ClusterSubnetStateWatcher::new(css_api, handle);
            tokio::spawn(async move { watcher.watch().await })
        };

        Ok(Self {
            monitor,
            nnc_watcher,
            css_watcher,
        })
    }

    /// Runs until any task exits. The tasks run forever short of cancellation
    /// or a broken watch stream.
    pub async fn run(mut self) -> Result<(), AgentError> {
        info!("IPAM agent running");

        tokio::select! {
            result = &mut self.monitor => {
                result.map_err(|e| AgentError::Watch(format!("pool monitor panicked: {e}")))?
            }
            result = &mut self.nnc_watcher => {
                result.map_err(|e| AgentError::Watch(format!("NodeNetworkConfig watcher panicked: {e}")))?
            }
            result = &mut self.css_watcher => {
                result.map_err(|e| AgentError::Watch(format!("ClusterSubnetState watcher panicked: {e}")))?
            }
        }
    }
}

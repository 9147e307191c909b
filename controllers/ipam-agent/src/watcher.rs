//! Kubernetes resource watchers.
//!
//! Streams NodeNetworkConfig and ClusterSubnetState changes into the pool
//! monitor through its handle.

use crds::{ClusterSubnetState, NodeNetworkConfig};
use futures::TryStreamExt;
use kube::Api;
use kube_runtime::watcher;
use tracing::{debug, error, info};

use crate::error::AgentError;
use crate::monitor::MonitorHandle;

/// Watches the node's own NodeNetworkConfig.
pub struct NodeNetworkConfigWatcher {
    api: Api<NodeNetworkConfig>,
    node_name: String,
    monitor: MonitorHandle,
}

impl NodeNetworkConfigWatcher {
    pub fn new(api: Api<NodeNetworkConfig>, node_name: String, monitor: MonitorHandle) -> Self {
        Self {
            api,
            node_name,
            monitor,
        }
    }

    /// Starts watching. Runs until the stream or the monitor fails.
    pub async fn watch(&self) -> Result<(), AgentError> {
        info!(node = %self.node_name, "starting NodeNetworkConfig watcher");

        let config =
            watcher::Config::default().fields(&format!("metadata.name={}", self.node_name));
        let mut stream = Box::pin(watcher(self.api.clone(), config));

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| AgentError::Watch(format!("NodeNetworkConfig watch stream error: {e}")))?
        {
            match event {
                watcher::Event::Apply(nnc) => {
                    debug!("NodeNetworkConfig applied");
                    self.monitor.update(nnc).await?;
                }
                watcher::Event::InitApply(nnc) => {
                    debug!("NodeNetworkConfig init apply");
                    self.monitor.update(nnc).await?;
                }
                watcher::Event::Delete(_) => {
                    error!("NodeNetworkConfig deleted while the agent is running");
                }
                watcher::Event::Init => {
                    debug!("NodeNetworkConfig watcher initialized");
                }
                watcher::Event::InitDone => {
                    info!("NodeNetworkConfig watcher initialization complete");
                }
            }
        }

        Ok(())
    }
}

/// Watches ClusterSubnetState for exhaustion signals.
pub struct ClusterSubnetStateWatcher {
    api: Api<ClusterSubnetState>,
    monitor: MonitorHandle,
}

impl ClusterSubnetStateWatcher {
    pub fn new(api: Api<ClusterSubnetState>, monitor: MonitorHandle) -> Self {
        Self { api, monitor }
    }

    /// Starts watching. Runs until the stream or the monitor fails.
    pub async fn watch(&self) -> Result<(), AgentError> {
        info!("starting ClusterSubnetState watcher");

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| AgentError::Watch(format!("ClusterSubnetState watch stream error: {e}")))?
        {
            match event {
                watcher::Event::Apply(css) => {
                    let name = css.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!(name, "ClusterSubnetState applied");
                    self.monitor.update_exhaustion(css).await?;
                }
                watcher::Event::InitApply(css) => {
                    let name = css.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!(name, "ClusterSubnetState init apply");
                    self.monitor.update_exhaustion(css).await?;
                }
                watcher::Event::Delete(css) => {
                    let name = css.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!(name, "ClusterSubnetState deleted");
                }
                watcher::Event::Init => {
                    debug!("ClusterSubnetState watcher initialized");
                }
                watcher::Event::InitDone => {
                    info!("ClusterSubnetState watcher initialization complete");
                }
            }
        }

        Ok(())
    }
}

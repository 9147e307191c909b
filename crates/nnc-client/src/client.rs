//! kube-backed NodeNetworkConfig spec client
//!
//! Patches the spec of the node's own NodeNetworkConfig with server-side
//! apply. Force ownership keeps the agent authoritative over the spec even if
//! another writer has touched it.

use crate::error::PublishError;
use crate::SpecPublisher;
use crds::{NodeNetworkConfig, NodeNetworkConfigSpec};
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tracing::debug;

/// NodeNetworkConfig spec client for a single named object.
pub struct NncClient {
    api: Api<NodeNetworkConfig>,
    name: String,
    params: PatchParams,
}

impl NncClient {
    /// Creates a client scoped to one NodeNetworkConfig.
    ///
    /// # Arguments
    /// * `api` - namespaced NodeNetworkConfig API handle
    /// * `name` - object name, conventionally the node name
    /// * `field_manager` - identity recorded as the spec's field owner
    pub fn new(api: Api<NodeNetworkConfig>, name: impl Into<String>, field_manager: &str) -> Self {
        Self {
            api,
            name: name.into(),
            params: PatchParams::apply(field_manager).force(),
        }
    }

    /// Fetches the current NodeNetworkConfig.
    pub async fn get(&self) -> Result<NodeNetworkConfig, kube::Error> {
        self.api.get(&self.name).await
    }
}

#[async_trait::async_trait]
impl SpecPublisher for NncClient {
    async fn update_spec(
        &self,
        spec: &NodeNetworkConfigSpec,
    ) -> Result<NodeNetworkConfig, PublishError> {
        let patch = json!({
            "apiVersion": "acn.azure.com/v1alpha",
            "kind": "NodeNetworkConfig",
            "spec": spec,
        });
        debug!(
            name = %self.name,
            requested = spec.requested_ip_count,
            not_in_use = spec.ips_not_in_use.len(),
            "patching NodeNetworkConfig spec"
        );
        self.api
            .patch(&self.name, &self.params, &Patch::Apply(&patch))
            .await
            .map_err(PublishError::classify)
    }
}

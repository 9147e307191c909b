//! NodeNetworkConfig spec client
//!
//! Publishes the node's desired pool state (requested IP count plus the IPs
//! no longer in use) to its NodeNetworkConfig custom resource. Publishes are
//! set-to-target: the whole spec is replaced every time, never diffed.
//!
//! The `SpecPublisher` trait abstracts the client so the pool monitor can be
//! unit tested against a mock.

pub mod client;
pub mod error;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::NncClient;
pub use error::PublishError;
#[cfg(feature = "test-util")]
pub use mock::{MockFailure, MockSpecPublisher};

use crds::{NodeNetworkConfig, NodeNetworkConfigSpec};

/// Publisher of NodeNetworkConfig spec updates.
#[async_trait::async_trait]
pub trait SpecPublisher: Send + Sync {
    /// Replaces the NodeNetworkConfig spec with the passed one.
    async fn update_spec(
        &self,
        spec: &NodeNetworkConfigSpec,
    ) -> Result<NodeNetworkConfig, PublishError>;
}

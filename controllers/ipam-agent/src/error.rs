//! Agent-specific error types.

use crate::lifecycle::LifecycleError;
use nnc_client::PublishError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the IPAM agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Desired-spec publish failed
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// Desired-spec publish exceeded its deadline
    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),

    /// IP lifecycle store error
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// A vnet-block network container carried an unparseable primary prefix
    #[error("invalid primary IP prefix: {0}")]
    InvalidPrimaryIp(String),

    /// The pool monitor loop is no longer running
    #[error("pool monitor stopped")]
    MonitorStopped,

    /// Resource watch failed
    #[error("resource watch failed: {0}")]
    Watch(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

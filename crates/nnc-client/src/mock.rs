//! Mock spec publisher for unit testing
//!
//! Records every published spec in memory and can be primed to fail the next
//! publish, so monitor tests can exercise the retry paths without an API
//! server.

use crate::error::PublishError;
use crate::SpecPublisher;
use crds::{NodeNetworkConfig, NodeNetworkConfigSpec};
use kube::core::ErrorResponse;
use std::sync::{Arc, Mutex};

/// Kind of failure the mock should inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transient,
    Permanent,
}

#[derive(Default)]
struct MockState {
    published: Vec<NodeNetworkConfigSpec>,
    fail_next: Option<MockFailure>,
}

/// Mock `SpecPublisher` for testing.
#[derive(Clone, Default)]
pub struct MockSpecPublisher {
    state: Arc<Mutex<MockState>>,
}

impl MockSpecPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `update_spec` call fail with the given kind.
    pub fn fail_next(&self, failure: MockFailure) {
        self.state.lock().unwrap().fail_next = Some(failure);
    }

    /// Every spec published so far, in order.
    pub fn published(&self) -> Vec<NodeNetworkConfigSpec> {
        self.state.lock().unwrap().published.clone()
    }

    /// The most recently published spec, if any.
    pub fn last_published(&self) -> Option<NodeNetworkConfigSpec> {
        self.state.lock().unwrap().published.last().cloned()
    }

    pub fn publish_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }
}

#[async_trait::async_trait]
impl SpecPublisher for MockSpecPublisher {
    async fn update_spec(
        &self,
        spec: &NodeNetworkConfigSpec,
    ) -> Result<NodeNetworkConfig, PublishError> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.fail_next.take() {
            let code = match failure {
                MockFailure::Transient => 500,
                MockFailure::Permanent => 422,
            };
            let err = kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "injected failure".to_string(),
                reason: "MockFailure".to_string(),
                code,
            });
            return Err(PublishError::classify(err));
        }
        state.published.push(spec.clone());
        Ok(NodeNetworkConfig::new("mock", spec.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_published_specs_in_order() {
        let mock = MockSpecPublisher::new();
        for requested in [16, 32] {
            let spec = NodeNetworkConfigSpec {
                requested_ip_count: requested,
                ips_not_in_use: vec![],
            };
            mock.update_spec(&spec).await.unwrap();
        }
        let published = mock.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].requested_ip_count, 16);
        assert_eq!(published[1].requested_ip_count, 32);
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let mock = MockSpecPublisher::new();
        mock.fail_next(MockFailure::Transient);
        let spec = NodeNetworkConfigSpec::default();
        let err = mock.update_spec(&spec).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mock.publish_count(), 0);

        mock.update_spec(&spec).await.unwrap();
        assert_eq!(mock.publish_count(), 1);
    }
}

//! NodeNetworkConfig client errors

use thiserror::Error;

/// Errors that can occur when publishing a NodeNetworkConfig spec.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Retryable failure. The caller republishes from freshly recomputed
    /// state on its next reconcile pass.
    #[error("transient publish failure: {0}")]
    Transient(#[source] kube::Error),

    /// Non-retryable failure: schema rejection, missing object, or forbidden.
    #[error("permanent publish failure: {0}")]
    Permanent(#[source] kube::Error),
}

impl PublishError {
    /// Classifies a kube API error. Client-side rejections that a retry
    /// cannot fix are permanent; everything else is worth retrying.
    pub fn classify(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if matches!(resp.code, 400 | 403 | 404 | 405 | 410 | 422) => {
                Self::Permanent(err)
            }
            _ => Self::Transient(err),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

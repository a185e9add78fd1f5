//! Error types for the cluster client

use thiserror::Error;

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur when talking to the cluster
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server answered with an error status
    #[error("kubernetes api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The API server could not be reached at all
    #[error("cannot reach the kubernetes api: {0}")]
    Connection(String),

    /// No usable kubeconfig / in-cluster credentials
    #[error("failed to configure kubernetes client: {0}")]
    Config(String),
}

impl ClusterError {
    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// Errors worth retrying: connection trouble, throttling, 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Config(_) => false,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => Self::Api {
                status: response.code,
                message: response.message,
            },
            other => Self::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_predicate() {
        let err = ClusterError::Api { status: 404, message: "not found".to_string() };
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_predicate() {
        assert!(ClusterError::Connection("reset".to_string()).is_transient());
        assert!(ClusterError::Api { status: 503, message: String::new() }.is_transient());
        assert!(ClusterError::Api { status: 429, message: String::new() }.is_transient());
        assert!(!ClusterError::Api { status: 403, message: String::new() }.is_transient());
    }
}

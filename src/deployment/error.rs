use thiserror::Error;

use super::model::{DeploymentId, DeploymentStatus};
use super::provisioner::TeardownError;
use crate::cluster::ClusterError;
use crate::source::SourceError;
use crate::store::StoreError;

/// Broad error classes, used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Upstream,
    Internal,
}

/// Errors surfaced by lifecycle commands
#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deployment {0} not found")]
    NotFound(DeploymentId),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deployment {id} is {status}; {action} is not allowed")]
    InvalidState {
        id: DeploymentId,
        status: DeploymentStatus,
        action: &'static str,
    },

    #[error("{operation} failed: {source}")]
    Cluster {
        operation: &'static str,
        #[source]
        source: ClusterError,
    },

    #[error("{operation} failed: {source}")]
    Source {
        operation: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("Teardown incomplete: {0}")]
    Teardown(#[from] TeardownError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl DeploymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeploymentError::Validation(_) => ErrorKind::Validation,
            DeploymentError::NotFound(_) => ErrorKind::NotFound,
            DeploymentError::Conflict(_) | DeploymentError::InvalidState { .. } => {
                ErrorKind::Conflict
            }
            DeploymentError::Cluster { .. }
            | DeploymentError::Source { .. }
            | DeploymentError::Teardown(_) => ErrorKind::Upstream,
            DeploymentError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            DeploymentError::Store(StoreError::InvalidTransition { .. }) => ErrorKind::Conflict,
            DeploymentError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn cluster(operation: &'static str, source: ClusterError) -> Self {
        DeploymentError::Cluster { operation, source }
    }

    pub fn provider(operation: &'static str, source: SourceError) -> Self {
        DeploymentError::Source { operation, source }
    }
}

impl From<StoreError> for DeploymentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => DeploymentError::NotFound(id),
            other => DeploymentError::Store(other),
        }
    }
}

pub type DeploymentResult<T> = Result<T, DeploymentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ResourceKind;
    use uuid::Uuid;

    #[test]
    fn test_kinds() {
        assert_eq!(
            DeploymentError::Validation("name is required".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DeploymentError::Conflict("repository must contain a Dockerfile".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DeploymentError::cluster(
                "scale",
                ClusterError::api(ResourceKind::Workload, "timeout")
            )
            .kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            DeploymentError::provider("check build recipe", SourceError::Transport("reset".into()))
                .kind(),
            ErrorKind::Upstream
        );
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let id = Uuid::new_v4();
        let err: DeploymentError = StoreError::NotFound(id).into();
        assert!(matches!(err, DeploymentError::NotFound(found) if found == id));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_message_carries_operation() {
        let err = DeploymentError::cluster(
            "restart",
            ClusterError::NotFound {
                kind: ResourceKind::Workload,
                name: "web".into(),
            },
        );
        assert_eq!(err.to_string(), "restart failed: workload 'web' not found");
    }
}

//! Engine-level errors

use std::time::Duration;

use uuid::Uuid;

use crate::graph::GraphError;
use crate::persistence::StoreError;
use crate::workflow::WorkflowStatus;

/// Errors returned by [`WorkflowEngine`](crate::WorkflowEngine) operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The definition failed validation; nothing was stored
    #[error("invalid workflow definition: {0}")]
    Graph(#[from] GraphError),

    /// The requested transition is not allowed from the current status
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    /// No such instance for this tenant
    ///
    /// Instances owned by other tenants are reported the same way.
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// Store failure; callers may retry the operation
    #[error("store error: {0}")]
    Store(StoreError),

    /// The engine is shutting down and accepts no new work
    #[error("workflow engine is shutting down")]
    ShuttingDown,

    /// The instance did not reach a terminal status in time
    #[error("workflow instance {instance_id} not terminal after {waited:?}")]
    WaitTimeout { instance_id: Uuid, waited: Duration },
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InstanceNotFound(id) => Self::InstanceNotFound(id),
            StoreError::TenantMismatch { instance_id, .. } => Self::InstanceNotFound(instance_id),
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    /// Whether the caller may retry the same call
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_mismatch_is_not_found() {
        let id = Uuid::now_v7();
        let err = EngineError::from(StoreError::TenantMismatch {
            instance_id: id,
            tenant_id: "other".into(),
        });

        assert!(matches!(err, EngineError::InstanceNotFound(found) if found == id));
        assert_eq!(err.to_string(), format!("workflow instance not found: {}", id));
    }

    #[test]
    fn test_store_errors_pass_through() {
        let err = EngineError::from(StoreError::Database("connection refused".into()));
        assert!(err.is_transient());

        let err = EngineError::from(StoreError::Serialization("bad json".into()));
        assert!(matches!(err, EngineError::Store(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = EngineError::InvalidTransition {
            from: WorkflowStatus::Completed,
            to: WorkflowStatus::Paused,
        };
        assert_eq!(err.to_string(), "invalid transition from COMPLETED to PAUSED");
    }
}

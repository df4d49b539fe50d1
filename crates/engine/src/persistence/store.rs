//! WorkflowStore trait definition

use async_trait::async_trait;
use uuid::Uuid;

use crate::workflow::{
    DefinitionRef, TaskState, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Instance not found
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// Instance exists but belongs to another tenant
    #[error("workflow instance {instance_id} does not belong to tenant '{tenant_id}'")]
    TenantMismatch { instance_id: Uuid, tenant_id: String },

    /// Definition not found
    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(DefinitionRef),

    /// A different definition is already stored under the same name and version
    #[error("workflow definition {0} already exists with a different body")]
    DefinitionConflict(DefinitionRef),

    /// Task state not found
    #[error("task '{task_id}' not found in instance {instance_id}")]
    TaskNotFound { instance_id: Uuid, task_id: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Filter for instance listing
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<WorkflowStatus>,
    pub definition_name: Option<String>,
}

impl InstanceFilter {
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_definition_name(mut self, name: impl Into<String>) -> Self {
        self.definition_name = Some(name.into());
        self
    }

    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.status.map_or(true, |s| s == instance.status)
            && self
                .definition_name
                .as_deref()
                .map_or(true, |n| n == instance.definition_ref.name)
    }
}

/// Pagination parameters
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// Tenant-scoped persistence for definitions, instances and task states
///
/// Every instance operation takes the caller's `tenant_id`. An instance owned
/// by another tenant yields [`StoreError::TenantMismatch`]; callers outside
/// the engine see that as not-found.
///
/// Implementations:
/// - [`InMemoryWorkflowStore`](super::InMemoryWorkflowStore): testing and
///   single-process deployments without a database
/// - [`PostgresWorkflowStore`](super::PostgresWorkflowStore): durable JSONB
///   documents in PostgreSQL
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Definitions
    // =========================================================================

    /// Store a definition; storing an identical body again is a no-op
    ///
    /// # Errors
    ///
    /// [`StoreError::DefinitionConflict`] if a different body exists under
    /// the same `(tenant_id, name, version)`.
    async fn put_definition(
        &self,
        tenant_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError>;

    /// Load a definition
    async fn get_definition(
        &self,
        tenant_id: &str,
        definition_ref: &DefinitionRef,
    ) -> Result<WorkflowDefinition, StoreError>;

    // =========================================================================
    // Instances
    // =========================================================================

    /// Create an instance together with its initial task states
    async fn create(
        &self,
        instance: &WorkflowInstance,
        tasks: &[TaskState],
    ) -> Result<(), StoreError>;

    /// Load an instance
    async fn get(&self, tenant_id: &str, instance_id: Uuid)
        -> Result<WorkflowInstance, StoreError>;

    /// Load the task states of an instance in definition order
    async fn get_task_states(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<Vec<TaskState>, StoreError>;

    /// Write the instance's status, context and timestamps
    ///
    /// `tenant_id` and `definition_ref` are immutable and never rewritten.
    async fn update_status(
        &self,
        tenant_id: &str,
        instance: &WorkflowInstance,
    ) -> Result<(), StoreError>;

    /// Write one task state
    async fn update_task_state(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
        state: &TaskState,
    ) -> Result<(), StoreError>;

    /// List a tenant's instances, newest first
    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    /// Delete an instance and its task states
    async fn delete(&self, tenant_id: &str, instance_id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Every instance in `status`, across tenants
    ///
    /// Used only by crash recovery, which runs with engine-level authority.
    async fn list_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;
}

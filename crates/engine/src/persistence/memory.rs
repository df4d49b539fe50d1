//! In-memory implementation of WorkflowStore

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::workflow::{
    DefinitionRef, TaskState, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

type DefinitionKey = (String, String, u32);

fn definition_key(tenant_id: &str, definition_ref: &DefinitionRef) -> DefinitionKey {
    (
        tenant_id.to_string(),
        definition_ref.name.clone(),
        definition_ref.version,
    )
}

/// Instance record with its task states in definition order
struct StoredInstance {
    instance: WorkflowInstance,
    tasks: Vec<TaskState>,
}

impl StoredInstance {
    fn check_tenant(&self, tenant_id: &str) -> Result<(), StoreError> {
        if self.instance.tenant_id == tenant_id {
            Ok(())
        } else {
            Err(StoreError::TenantMismatch {
                instance_id: self.instance.instance_id,
                tenant_id: tenant_id.to_string(),
            })
        }
    }
}

/// In-memory implementation of WorkflowStore
///
/// Used by tests and by engines configured without a database. It provides
/// the same semantics as the PostgreSQL implementation, minus durability.
///
/// # Example
///
/// ```
/// use taskloom_engine::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// assert_eq!(store.instance_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    definitions: RwLock<HashMap<DefinitionKey, WorkflowDefinition>>,
    instances: RwLock<HashMap<Uuid, StoredInstance>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of instances across all tenants
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Get the number of stored definitions across all tenants
    pub fn definition_count(&self) -> usize {
        self.definitions.read().len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn put_definition(
        &self,
        tenant_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError> {
        let definition_ref = definition.reference();
        let mut definitions = self.definitions.write();

        match definitions.get(&definition_key(tenant_id, &definition_ref)) {
            Some(existing) if existing == definition => Ok(()),
            Some(_) => Err(StoreError::DefinitionConflict(definition_ref)),
            None => {
                definitions.insert(definition_key(tenant_id, &definition_ref), definition.clone());
                Ok(())
            }
        }
    }

    async fn get_definition(
        &self,
        tenant_id: &str,
        definition_ref: &DefinitionRef,
    ) -> Result<WorkflowDefinition, StoreError> {
        self.definitions
            .read()
            .get(&definition_key(tenant_id, definition_ref))
            .cloned()
            .ok_or_else(|| StoreError::DefinitionNotFound(definition_ref.clone()))
    }

    async fn create(
        &self,
        instance: &WorkflowInstance,
        tasks: &[TaskState],
    ) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        if instances.contains_key(&instance.instance_id) {
            return Err(StoreError::Database(format!(
                "duplicate instance id {}",
                instance.instance_id
            )));
        }

        instances.insert(
            instance.instance_id,
            StoredInstance {
                instance: instance.clone(),
                tasks: tasks.to_vec(),
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<WorkflowInstance, StoreError> {
        let instances = self.instances.read();
        let stored = instances
            .get(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;
        stored.check_tenant(tenant_id)?;
        Ok(stored.instance.clone())
    }

    async fn get_task_states(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<Vec<TaskState>, StoreError> {
        let instances = self.instances.read();
        let stored = instances
            .get(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;
        stored.check_tenant(tenant_id)?;
        Ok(stored.tasks.clone())
    }

    async fn update_status(
        &self,
        tenant_id: &str,
        instance: &WorkflowInstance,
    ) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let stored = instances
            .get_mut(&instance.instance_id)
            .ok_or(StoreError::InstanceNotFound(instance.instance_id))?;
        stored.check_tenant(tenant_id)?;

        stored.instance.status = instance.status;
        stored.instance.context = instance.context.clone();
        stored.instance.updated_at = instance.updated_at;
        stored.instance.completed_at = instance.completed_at;
        Ok(())
    }

    async fn update_task_state(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
        state: &TaskState,
    ) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let stored = instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;
        stored.check_tenant(tenant_id)?;

        let slot = stored
            .tasks
            .iter_mut()
            .find(|t| t.task_id == state.task_id)
            .ok_or_else(|| StoreError::TaskNotFound {
                instance_id,
                task_id: state.task_id.clone(),
            })?;
        *slot = state.clone();
        Ok(())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let instances = self.instances.read();
        let mut matching: Vec<WorkflowInstance> = instances
            .values()
            .map(|s| &s.instance)
            .filter(|i| i.tenant_id == tenant_id && filter.matches(i))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.instance_id.cmp(&a.instance_id))
        });

        Ok(matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect())
    }

    async fn delete(&self, tenant_id: &str, instance_id: Uuid) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let stored = instances
            .get(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;
        stored.check_tenant(tenant_id)?;

        instances.remove(&instance_id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let instances = self.instances.read();
        let mut matching: Vec<WorkflowInstance> = instances
            .values()
            .filter(|s| s.instance.status == status)
            .map(|s| s.instance.clone())
            .collect();
        matching.sort_by_key(|i| i.instance_id);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{TaskDefinition, TaskStatus, WorkflowContext};
    use serde_json::json;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new("etl", 1)
            .with_task(TaskDefinition::new("extract", "noop"))
            .with_task(TaskDefinition::new("load", "noop").depends_on(["extract"]))
    }

    async fn create_instance(store: &InMemoryWorkflowStore, tenant: &str) -> WorkflowInstance {
        let definition = definition();
        let instance = WorkflowInstance::new(tenant, &definition, WorkflowContext::new());
        let tasks: Vec<_> = definition
            .tasks
            .iter()
            .map(|t| TaskState::pending(&t.id))
            .collect();
        store.create(&instance, &tasks).await.unwrap();
        instance
    }

    #[tokio::test]
    async fn test_definition_put_is_idempotent() {
        let store = InMemoryWorkflowStore::new();
        let definition = definition();

        store.put_definition("t1", &definition).await.unwrap();
        store.put_definition("t1", &definition).await.unwrap();
        store.put_definition("t2", &definition).await.unwrap();

        assert_eq!(store.definition_count(), 2);
        let loaded = store
            .get_definition("t1", &definition.reference())
            .await
            .unwrap();
        assert_eq!(loaded, definition);
    }

    #[tokio::test]
    async fn test_definition_conflict() {
        let store = InMemoryWorkflowStore::new();
        store.put_definition("t1", &definition()).await.unwrap();

        let changed = definition().with_task(TaskDefinition::new("report", "noop"));
        let result = store.put_definition("t1", &changed).await;

        assert_eq!(
            result,
            Err(StoreError::DefinitionConflict(DefinitionRef::new("etl", 1)))
        );
    }

    #[tokio::test]
    async fn test_definition_is_tenant_scoped() {
        let store = InMemoryWorkflowStore::new();
        store.put_definition("t1", &definition()).await.unwrap();

        let result = store
            .get_definition("t2", &DefinitionRef::new("etl", 1))
            .await;
        assert!(matches!(result, Err(StoreError::DefinitionNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryWorkflowStore::new();
        let instance = create_instance(&store, "t1").await;

        let loaded = store.get("t1", instance.instance_id).await.unwrap();
        assert_eq!(loaded, instance);

        let tasks = store
            .get_task_states("t1", instance.instance_id)
            .await
            .unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["extract", "load"]);
    }

    #[tokio::test]
    async fn test_tenant_mismatch() {
        let store = InMemoryWorkflowStore::new();
        let instance = create_instance(&store, "t1").await;

        let result = store.get("t2", instance.instance_id).await;
        assert!(matches!(result, Err(StoreError::TenantMismatch { .. })));

        let result = store.delete("t2", instance.instance_id).await;
        assert!(matches!(result, Err(StoreError::TenantMismatch { .. })));
        assert_eq!(store.instance_count(), 1);

        let missing = store.get("t1", Uuid::now_v7()).await;
        assert!(matches!(missing, Err(StoreError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_status_keeps_tenant() {
        let store = InMemoryWorkflowStore::new();
        let mut instance = create_instance(&store, "t1").await;

        instance.status = WorkflowStatus::Running;
        instance.context.insert("rows".into(), json!(10));
        instance.tenant_id = "t2".into();
        store.update_status("t1", &instance).await.unwrap();

        let loaded = store.get("t1", instance.instance_id).await.unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Running);
        assert_eq!(loaded.context["rows"], json!(10));
        assert_eq!(loaded.tenant_id, "t1");
    }

    #[tokio::test]
    async fn test_update_task_state() {
        let store = InMemoryWorkflowStore::new();
        let instance = create_instance(&store, "t1").await;

        let mut state = TaskState::pending("load");
        state.status = TaskStatus::Running;
        state.attempt_count = 1;
        store
            .update_task_state("t1", instance.instance_id, &state)
            .await
            .unwrap();

        let tasks = store
            .get_task_states("t1", instance.instance_id)
            .await
            .unwrap();
        assert_eq!(tasks[1].status, TaskStatus::Running);
        assert_eq!(tasks[0].status, TaskStatus::Pending);

        let unknown = store
            .update_task_state("t1", instance.instance_id, &TaskState::pending("ghost"))
            .await;
        assert!(matches!(unknown, Err(StoreError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_by_tenant_filters_and_paginates() {
        let store = InMemoryWorkflowStore::new();
        let mut created = vec![];
        for _ in 0..5 {
            created.push(create_instance(&store, "t1").await);
        }
        create_instance(&store, "t2").await;

        let mut running = created[0].clone();
        running.status = WorkflowStatus::Running;
        store.update_status("t1", &running).await.unwrap();

        let all = store
            .list_by_tenant("t1", InstanceFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|i| i.tenant_id == "t1"));
        assert_eq!(all[0].instance_id, created[4].instance_id);

        let page = store
            .list_by_tenant(
                "t1",
                InstanceFilter::default(),
                Pagination {
                    offset: 1,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].instance_id, created[3].instance_id);

        let filtered = store
            .list_by_tenant(
                "t1",
                InstanceFilter::default().with_status(WorkflowStatus::Running),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let by_status = store.list_by_status(WorkflowStatus::Running).await.unwrap();
        assert_eq!(by_status.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryWorkflowStore::new();
        let instance = create_instance(&store, "t1").await;

        store.delete("t1", instance.instance_id).await.unwrap();
        assert_eq!(store.instance_count(), 0);
        assert!(matches!(
            store.get_task_states("t1", instance.instance_id).await,
            Err(StoreError::InstanceNotFound(_))
        ));
    }
}

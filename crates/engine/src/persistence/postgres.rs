//! PostgreSQL implementation of WorkflowStore
//!
//! Records are stored as JSONB documents next to the indexed columns the
//! queries filter on:
//! - `taskloom_definitions`: one row per `(tenant_id, name, version)`
//! - `taskloom_instances`: one row per instance, `tenant_id`/`status` indexed
//! - `taskloom_task_states`: one row per task, ordered by `position`

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::{
    DefinitionRef, TaskState, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

/// Migrations bundled with the crate
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("{}: {}", context, e);
        StoreError::Database(e.to_string())
    }
}

/// PostgreSQL implementation of WorkflowStore
///
/// Uses a connection pool; every method is a single statement or a single
/// transaction, so concurrent engines sharing a database see consistent rows.
///
/// # Example
///
/// ```ignore
/// use taskloom_engine::PostgresWorkflowStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/taskloom").await?;
/// let store = PostgresWorkflowStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(db_error("Failed to connect to database"))?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            error!("Failed to run migrations: {}", e);
            StoreError::Database(e.to_string())
        })
    }

    /// Distinguish a missing instance from one owned by another tenant
    async fn check_owner(&self, tenant_id: &str, instance_id: Uuid) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT tenant_id FROM taskloom_instances WHERE instance_id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to check instance owner"))?
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        let owner: String = row.get("tenant_id");
        if owner == tenant_id {
            Ok(())
        } else {
            Err(StoreError::TenantMismatch {
                instance_id,
                tenant_id: tenant_id.to_string(),
            })
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> Result<T, StoreError> {
    serde_json::from_value(document).map_err(StoreError::from)
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, definition), fields(definition = %definition.reference()))]
    async fn put_definition(
        &self,
        tenant_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError> {
        let document = serde_json::to_value(definition)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO taskloom_definitions (tenant_id, name, version, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, name, version) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(&definition.name)
        .bind(i64::from(definition.version))
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to store definition"))?
        .rows_affected();

        if inserted == 0 {
            let existing = self
                .get_definition(tenant_id, &definition.reference())
                .await?;
            if existing != *definition {
                return Err(StoreError::DefinitionConflict(definition.reference()));
            }
        }

        debug!(tenant_id, "stored definition");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_definition(
        &self,
        tenant_id: &str,
        definition_ref: &DefinitionRef,
    ) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT document FROM taskloom_definitions
            WHERE tenant_id = $1 AND name = $2 AND version = $3
            "#,
        )
        .bind(tenant_id)
        .bind(&definition_ref.name)
        .bind(i64::from(definition_ref.version))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load definition"))?
        .ok_or_else(|| StoreError::DefinitionNotFound(definition_ref.clone()))?;

        decode(row.get("document"))
    }

    #[instrument(skip(self, instance, tasks), fields(instance_id = %instance.instance_id, tenant_id = %instance.tenant_id))]
    async fn create(
        &self,
        instance: &WorkflowInstance,
        tasks: &[TaskState],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        sqlx::query(
            r#"
            INSERT INTO taskloom_instances
                (instance_id, tenant_id, definition_name, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(instance.instance_id)
        .bind(&instance.tenant_id)
        .bind(&instance.definition_ref.name)
        .bind(instance.status.as_str())
        .bind(serde_json::to_value(instance)?)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to create instance"))?;

        for (position, state) in tasks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO taskloom_task_states
                    (instance_id, tenant_id, task_id, position, status, document)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(instance.instance_id)
            .bind(&instance.tenant_id)
            .bind(&state.task_id)
            .bind(position as i32)
            .bind(state.status.as_str())
            .bind(serde_json::to_value(state)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to create task state"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit instance"))?;

        debug!(tasks = tasks.len(), "created instance");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query(
            "SELECT tenant_id, document FROM taskloom_instances WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load instance"))?
        .ok_or(StoreError::InstanceNotFound(instance_id))?;

        let owner: String = row.get("tenant_id");
        if owner != tenant_id {
            return Err(StoreError::TenantMismatch {
                instance_id,
                tenant_id: tenant_id.to_string(),
            });
        }

        decode(row.get("document"))
    }

    #[instrument(skip(self))]
    async fn get_task_states(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<Vec<TaskState>, StoreError> {
        self.check_owner(tenant_id, instance_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT document FROM taskloom_task_states
            WHERE instance_id = $1
            ORDER BY position
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load task states"))?;

        rows.into_iter().map(|row| decode(row.get("document"))).collect()
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id, status = %instance.status))]
    async fn update_status(
        &self,
        tenant_id: &str,
        instance: &WorkflowInstance,
    ) -> Result<(), StoreError> {
        // Only the mutable fields are merged into the stored document.
        let patch = json!({
            "status": instance.status,
            "context": instance.context,
            "updated_at": instance.updated_at,
            "completed_at": instance.completed_at,
        });

        let updated = sqlx::query(
            r#"
            UPDATE taskloom_instances
            SET status = $3, updated_at = $4, document = document || $5
            WHERE instance_id = $1 AND tenant_id = $2
            "#,
        )
        .bind(instance.instance_id)
        .bind(tenant_id)
        .bind(instance.status.as_str())
        .bind(instance.updated_at)
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update instance status"))?
        .rows_affected();

        if updated == 0 {
            self.check_owner(tenant_id, instance.instance_id).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, state), fields(task_id = %state.task_id, status = %state.status))]
    async fn update_task_state(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
        state: &TaskState,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE taskloom_task_states
            SET status = $4, document = $5
            WHERE instance_id = $1 AND tenant_id = $2 AND task_id = $3
            "#,
        )
        .bind(instance_id)
        .bind(tenant_id)
        .bind(&state.task_id)
        .bind(state.status.as_str())
        .bind(serde_json::to_value(state)?)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update task state"))?
        .rows_affected();

        if updated == 0 {
            self.check_owner(tenant_id, instance_id).await?;
            return Err(StoreError::TaskNotFound {
                instance_id,
                task_id: state.task_id.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, filter, pagination))]
    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM taskloom_instances
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR definition_name = $3)
            ORDER BY created_at DESC, instance_id DESC
            OFFSET $4 LIMIT $5
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.definition_name)
        .bind(i64::from(pagination.offset))
        .bind(i64::from(pagination.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list instances"))?;

        rows.into_iter().map(|row| decode(row.get("document"))).collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, tenant_id: &str, instance_id: Uuid) -> Result<(), StoreError> {
        let deleted = sqlx::query(
            "DELETE FROM taskloom_instances WHERE instance_id = $1 AND tenant_id = $2",
        )
        .bind(instance_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to delete instance"))?
        .rows_affected();

        if deleted == 0 {
            self.check_owner(tenant_id, instance_id).await?;
        }

        debug!(%instance_id, "deleted instance");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM taskloom_instances WHERE status = $1 ORDER BY instance_id",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list instances by status"))?;

        rows.into_iter().map(|row| decode(row.get("document"))).collect()
    }
}

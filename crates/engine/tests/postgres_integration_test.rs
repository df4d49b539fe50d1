//! Integration tests for PostgresWorkflowStore
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p taskloom-engine --test postgres_integration_test
//!
//! Every test returns early when `DATABASE_URL` is unset. Migrations are
//! applied on connect; each test works in its own random tenant.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use taskloom_engine::persistence::{
    InstanceFilter, Pagination, PostgresWorkflowStore, StoreError, WorkflowStore,
};
use taskloom_engine::workflow::{
    DefinitionRef, TaskDefinition, TaskState, TaskStatus, WorkflowContext, WorkflowDefinition,
    WorkflowInstance, WorkflowStatus,
};
use taskloom_engine::{EngineConfig, HandlerRegistry, TaskContext, TaskOutput, WorkflowEngine};

/// Connect and migrate, or `None` when no database is configured
async fn create_test_store() -> Option<PostgresWorkflowStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let store = PostgresWorkflowStore::connect(&database_url)
        .await
        .expect("Failed to connect to PostgreSQL");
    store.migrate().await.expect("Failed to run migrations");
    Some(store)
}

fn tenant() -> String {
    format!("tenant-{}", Uuid::now_v7())
}

fn pipeline() -> WorkflowDefinition {
    WorkflowDefinition::new("pipeline", 1)
        .with_task(TaskDefinition::new("extract", "db.extract"))
        .with_task(
            TaskDefinition::new("load", "db.load")
                .depends_on(["extract"])
                .with_retries(2, Duration::from_millis(250))
                .with_timeout(Duration::from_secs(5))
                .with_input(json!({ "table": "orders" })),
        )
}

async fn create_instance(
    store: &PostgresWorkflowStore,
    tenant_id: &str,
    definition: &WorkflowDefinition,
) -> WorkflowInstance {
    store.put_definition(tenant_id, definition).await.unwrap();
    let instance = WorkflowInstance::new(tenant_id, definition, WorkflowContext::new());
    let tasks: Vec<TaskState> = definition
        .tasks
        .iter()
        .map(|t| TaskState::pending(&t.id))
        .collect();
    store.create(&instance, &tasks).await.unwrap();
    instance
}

// ============================================
// Definitions
// ============================================

#[tokio::test]
async fn test_definition_round_trip_and_conflict() {
    let Some(store) = create_test_store().await else {
        return;
    };
    let tenant_id = tenant();
    let definition = pipeline();

    store.put_definition(&tenant_id, &definition).await.unwrap();
    // Identical body is a no-op
    store.put_definition(&tenant_id, &definition).await.unwrap();

    let loaded = store
        .get_definition(&tenant_id, &definition.reference())
        .await
        .unwrap();
    assert_eq!(loaded, definition);

    let changed = WorkflowDefinition::new("pipeline", 1)
        .with_task(TaskDefinition::new("only", "noop"));
    let err = store.put_definition(&tenant_id, &changed).await.unwrap_err();
    assert_eq!(err, StoreError::DefinitionConflict(definition.reference()));

    let missing = DefinitionRef::new("pipeline", 2);
    let err = store.get_definition(&tenant_id, &missing).await.unwrap_err();
    assert_eq!(err, StoreError::DefinitionNotFound(missing));

    // Definitions are tenant-scoped
    assert!(store
        .get_definition(&tenant(), &definition.reference())
        .await
        .is_err());
}

// ============================================
// Instances and task states
// ============================================

#[tokio::test]
async fn test_create_and_get_instance() {
    let Some(store) = create_test_store().await else {
        return;
    };
    let tenant_id = tenant();
    let instance = create_instance(&store, &tenant_id, &pipeline()).await;

    let loaded = store.get(&tenant_id, instance.instance_id).await.unwrap();
    assert_eq!(loaded.instance_id, instance.instance_id);
    assert_eq!(loaded.status, WorkflowStatus::Pending);
    assert_eq!(loaded.definition_ref, DefinitionRef::new("pipeline", 1));

    let tasks = store
        .get_task_states(&tenant_id, instance.instance_id)
        .await
        .unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["extract", "load"]);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn test_tenant_mismatch() {
    let Some(store) = create_test_store().await else {
        return;
    };
    let tenant_id = tenant();
    let instance = create_instance(&store, &tenant_id, &pipeline()).await;
    let intruder = tenant();

    assert!(matches!(
        store.get(&intruder, instance.instance_id).await,
        Err(StoreError::TenantMismatch { .. })
    ));
    assert!(matches!(
        store.get_task_states(&intruder, instance.instance_id).await,
        Err(StoreError::TenantMismatch { .. })
    ));
    assert!(matches!(
        store.update_status(&intruder, &instance).await,
        Err(StoreError::TenantMismatch { .. })
    ));
    assert!(matches!(
        store.delete(&intruder, instance.instance_id).await,
        Err(StoreError::TenantMismatch { .. })
    ));

    let missing = Uuid::now_v7();
    assert_eq!(
        store.get(&tenant_id, missing).await.unwrap_err(),
        StoreError::InstanceNotFound(missing)
    );
}

#[tokio::test]
async fn test_status_and_task_updates() {
    let Some(store) = create_test_store().await else {
        return;
    };
    let tenant_id = tenant();
    let mut instance = create_instance(&store, &tenant_id, &pipeline()).await;

    instance.status = WorkflowStatus::Running;
    instance.context.insert("rows".into(), json!(42));
    instance.updated_at = Utc::now();
    store.update_status(&tenant_id, &instance).await.unwrap();

    let mut extract = TaskState::pending("extract");
    extract.status = TaskStatus::Completed;
    extract.attempt_count = 1;
    extract.result = Some(json!({ "rows": 42 }));
    extract.started_at = Some(Utc::now());
    extract.finished_at = Some(Utc::now());
    store
        .update_task_state(&tenant_id, instance.instance_id, &extract)
        .await
        .unwrap();

    let loaded = store.get(&tenant_id, instance.instance_id).await.unwrap();
    assert_eq!(loaded.status, WorkflowStatus::Running);
    assert_eq!(loaded.context["rows"], json!(42));

    let tasks = store
        .get_task_states(&tenant_id, instance.instance_id)
        .await
        .unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[0].result, Some(json!({ "rows": 42 })));
    assert_eq!(tasks[1].status, TaskStatus::Pending);

    let running = store.list_by_status(WorkflowStatus::Running).await.unwrap();
    assert!(running.iter().any(|i| i.instance_id == instance.instance_id));

    let unknown = TaskState::pending("ghost");
    assert!(matches!(
        store
            .update_task_state(&tenant_id, instance.instance_id, &unknown)
            .await,
        Err(StoreError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_list_by_tenant_and_delete() {
    let Some(store) = create_test_store().await else {
        return;
    };
    let tenant_id = tenant();
    let definition = pipeline();
    let first = create_instance(&store, &tenant_id, &definition).await;
    let second = create_instance(&store, &tenant_id, &definition).await;

    let mut done = second.clone();
    done.status = WorkflowStatus::Completed;
    done.completed_at = Some(Utc::now());
    store.update_status(&tenant_id, &done).await.unwrap();

    let all = store
        .list_by_tenant(&tenant_id, InstanceFilter::default(), Pagination::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].instance_id, second.instance_id);

    let pending = store
        .list_by_tenant(
            &tenant_id,
            InstanceFilter::default().with_status(WorkflowStatus::Pending),
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].instance_id, first.instance_id);

    let page = store
        .list_by_tenant(
            &tenant_id,
            InstanceFilter::default(),
            Pagination {
                offset: 1,
                limit: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].instance_id, first.instance_id);

    store.delete(&tenant_id, first.instance_id).await.unwrap();
    assert!(matches!(
        store.get(&tenant_id, first.instance_id).await,
        Err(StoreError::InstanceNotFound(_))
    ));
    assert!(matches!(
        store.get_task_states(&tenant_id, first.instance_id).await,
        Err(StoreError::InstanceNotFound(_))
    ));
}

// ============================================
// Engine on PostgreSQL
// ============================================

#[tokio::test(flavor = "multi_thread")]
async fn test_engine_runs_on_postgres() {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return;
    };

    let mut registry = HandlerRegistry::new();
    registry.register_fn("db.extract", |_ctx: TaskContext| async move {
        Ok(TaskOutput::new(json!({ "rows": 3 })).with_update("rows", json!(3)))
    });
    registry.register_fn("db.load", |ctx: TaskContext| async move {
        Ok(TaskOutput::new(json!({
            "loaded": ctx.get("rows").cloned(),
            "table": ctx.input["table"].clone(),
        })))
    });

    let config = EngineConfig::default()
        .with_database_url(database_url)
        .with_status_poll_interval(Duration::from_millis(20));
    let engine = WorkflowEngine::from_config(config, registry).await.unwrap();
    let tenant_id = tenant();

    let id = engine.submit(pipeline(), &tenant_id).await.unwrap();
    engine.start(id, &tenant_id).await.unwrap();
    let report = engine
        .wait_for_terminal(id, &tenant_id, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(report.instance.status, WorkflowStatus::Completed);
    assert_eq!(
        report.task("load").unwrap().result,
        Some(json!({ "loaded": 3, "table": "orders" }))
    );
    assert_eq!(report.instance.context["rows"], json!(3));

    engine.purge(id, &tenant_id).await.unwrap();
    engine.shutdown().await;
}

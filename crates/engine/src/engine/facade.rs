//! Workflow engine facade
//!
//! `WorkflowEngine` is the tenant-scoped entry point: it validates
//! definitions, creates instances, forwards lifecycle commands to the
//! scheduler and answers status queries from the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::executor::TaskExecutor;
use super::scheduler::Scheduler;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{event_types, EngineEvent, EventBus, EventListener};
use crate::graph::resolve;
use crate::handler::HandlerRegistry;
use crate::persistence::{
    InMemoryWorkflowStore, InstanceFilter, Pagination, PostgresWorkflowStore, WorkflowStore,
};
use crate::worker::{DispatchPool, PoolStats};
use crate::workflow::{
    TaskState, WorkflowContext, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
    WorkflowStatusReport,
};

/// Builder for [`WorkflowEngine`]
pub struct WorkflowEngineBuilder {
    store: Arc<dyn WorkflowStore>,
    registry: HandlerRegistry,
    config: EngineConfig,
    events: EventBus,
}

impl WorkflowEngineBuilder {
    /// Use `config` instead of the defaults
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a lifecycle event listener
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.events.add(listener);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let executor = TaskExecutor::new(self.registry)
            .with_default_timeout(self.config.default_task_timeout);
        let pool = DispatchPool::new(self.config.pool_config());

        info!(
            max_concurrency = self.config.max_concurrency,
            queue_capacity = self.config.queue_capacity,
            handlers = executor.registry().len(),
            listeners = self.events.len(),
            "workflow engine created"
        );

        WorkflowEngine {
            scheduler: Arc::new(Scheduler::new(
                self.store.clone(),
                executor,
                pool,
                self.events,
            )),
            store: self.store,
            config: self.config,
            shutting_down: AtomicBool::new(false),
        }
    }
}

/// Multi-tenant workflow engine
///
/// One engine owns a single bounded dispatch pool shared by every tenant.
/// Every operation takes the caller's `tenant_id` and re-validates ownership;
/// another tenant's instance is reported as [`EngineError::InstanceNotFound`].
///
/// # Example
///
/// ```ignore
/// use taskloom_engine::prelude::*;
///
/// let mut registry = HandlerRegistry::new();
/// registry.register_fn("report.render", |ctx| async move {
///     Ok(TaskOutput::new(json!({ "rows": ctx.get("rows") })))
/// });
///
/// let engine = WorkflowEngine::builder(Arc::new(InMemoryWorkflowStore::new()), registry)
///     .with_config(EngineConfig::from_env())
///     .build();
///
/// let id = engine.submit(definition, "tenant-a").await?;
/// engine.start(id, "tenant-a").await?;
/// let report = engine.wait_for_terminal(id, "tenant-a", Duration::from_secs(30)).await?;
/// ```
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    scheduler: Arc<Scheduler>,
    config: EngineConfig,
    shutting_down: AtomicBool,
}

impl WorkflowEngine {
    /// Start building an engine over `store` with handlers from `registry`
    pub fn builder(store: Arc<dyn WorkflowStore>, registry: HandlerRegistry) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            store,
            registry,
            config: EngineConfig::default(),
            events: EventBus::new(),
        }
    }

    /// Create an engine with the default configuration
    pub fn new(store: Arc<dyn WorkflowStore>, registry: HandlerRegistry) -> Self {
        Self::builder(store, registry).build()
    }

    /// Create an engine from `config`
    ///
    /// Connects to PostgreSQL and applies migrations when `database_url` is
    /// set; otherwise state lives in memory.
    pub async fn from_config(
        config: EngineConfig,
        registry: HandlerRegistry,
    ) -> Result<Self, EngineError> {
        let store: Arc<dyn WorkflowStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresWorkflowStore::connect(url).await?;
                store.migrate().await?;
                info!("using PostgreSQL workflow store");
                Arc::new(store)
            }
            None => {
                info!("using in-memory workflow store");
                Arc::new(InMemoryWorkflowStore::new())
            }
        };

        Ok(Self::builder(store, registry).with_config(config).build())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validate and store `definition`, creating a `PENDING` instance
    pub async fn submit(
        &self,
        definition: WorkflowDefinition,
        tenant_id: &str,
    ) -> Result<Uuid, EngineError> {
        self.submit_with_context(definition, tenant_id, WorkflowContext::new())
            .await
    }

    /// Like [`submit`](Self::submit), seeding the instance context
    ///
    /// Nothing is stored when the definition fails validation.
    #[instrument(skip(self, definition, context), fields(definition = %definition.reference()))]
    pub async fn submit_with_context(
        &self,
        definition: WorkflowDefinition,
        tenant_id: &str,
        context: WorkflowContext,
    ) -> Result<Uuid, EngineError> {
        self.ensure_accepting()?;

        let graph = resolve(&definition)?;
        self.store.put_definition(tenant_id, &definition).await?;

        let instance = WorkflowInstance::new(tenant_id, &definition, context);
        let tasks: Vec<TaskState> = definition
            .tasks
            .iter()
            .map(|t| TaskState::pending(&t.id))
            .collect();
        self.store.create(&instance, &tasks).await?;

        info!(
            instance_id = %instance.instance_id,
            tasks = tasks.len(),
            layers = graph.layers().len(),
            "workflow submitted"
        );
        self.scheduler
            .events()
            .emit(
                EngineEvent::workflow(
                    event_types::WORKFLOW_SUBMITTED,
                    tenant_id,
                    instance.instance_id,
                )
                .with_data(json!({ "definition": definition.reference().to_string() })),
            )
            .await;

        Ok(instance.instance_id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begin dispatching a `PENDING` instance
    pub async fn start(&self, instance_id: Uuid, tenant_id: &str) -> Result<(), EngineError> {
        self.ensure_accepting()?;
        self.scheduler.start(tenant_id, instance_id).await
    }

    /// Stop dispatching new tasks of a `RUNNING` instance
    pub async fn pause(&self, instance_id: Uuid, tenant_id: &str) -> Result<(), EngineError> {
        self.scheduler.pause(tenant_id, instance_id).await
    }

    /// Continue a `PAUSED` instance
    pub async fn resume(&self, instance_id: Uuid, tenant_id: &str) -> Result<(), EngineError> {
        self.ensure_accepting()?;
        self.scheduler.resume(tenant_id, instance_id).await
    }

    /// Cancel a `PENDING`, `RUNNING` or `PAUSED` instance
    pub async fn cancel(&self, instance_id: Uuid, tenant_id: &str) -> Result<(), EngineError> {
        self.scheduler.cancel(tenant_id, instance_id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Latest durably recorded state of an instance and its tasks
    #[instrument(skip(self))]
    pub async fn get_status(
        &self,
        instance_id: Uuid,
        tenant_id: &str,
    ) -> Result<WorkflowStatusReport, EngineError> {
        let instance = self.store.get(tenant_id, instance_id).await?;
        let tasks = self.store.get_task_states(tenant_id, instance_id).await?;
        Ok(WorkflowStatusReport { instance, tasks })
    }

    /// A tenant's instances, newest first
    pub async fn list(
        &self,
        tenant_id: &str,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        Ok(self
            .store
            .list_by_tenant(tenant_id, filter, pagination)
            .await?)
    }

    /// Delete a terminal instance and its task states
    #[instrument(skip(self))]
    pub async fn purge(&self, instance_id: Uuid, tenant_id: &str) -> Result<(), EngineError> {
        let instance = self.store.get(tenant_id, instance_id).await?;
        if !instance.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: instance.status,
                to: WorkflowStatus::Cancelled,
            });
        }

        self.store.delete(tenant_id, instance_id).await?;
        info!("workflow purged");
        Ok(())
    }

    /// Poll the store until the instance is terminal
    ///
    /// # Errors
    ///
    /// [`EngineError::WaitTimeout`] if it is still running after `timeout`.
    #[instrument(skip(self))]
    pub async fn wait_for_terminal(
        &self,
        instance_id: Uuid,
        tenant_id: &str,
        timeout: Duration,
    ) -> Result<WorkflowStatusReport, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let report = self.get_status(instance_id, tenant_id).await?;
            if report.is_terminal() {
                return Ok(report);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::WaitTimeout {
                    instance_id,
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.config.status_poll_interval).await;
        }
    }

    // =========================================================================
    // Recovery and shutdown
    // =========================================================================

    /// Resume every `RUNNING` instance found in the store
    ///
    /// Tasks interrupted by a crash run again, so handlers must tolerate
    /// at-least-once execution. Returns the number of instances recovered.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        self.ensure_accepting()?;

        let mut recovered = 0;
        for instance in self.store.list_by_status(WorkflowStatus::Running).await? {
            match self.scheduler.recover_instance(&instance).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    instance_id = %instance.instance_id,
                    tenant_id = %instance.tenant_id,
                    error = %e,
                    "failed to recover workflow"
                ),
            }
        }

        info!(recovered, "recovery finished");
        Ok(recovered)
    }

    /// Stop accepting work and wait up to `shutdown_timeout` for in-flight attempts
    ///
    /// Instances stay `RUNNING` in the store; a later [`recover`](Self::recover)
    /// picks them up.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        match self
            .scheduler
            .pool()
            .shutdown(self.config.shutdown_timeout)
            .await
        {
            Ok(dropped) => info!(dropped, "workflow engine stopped"),
            Err(e) => warn!(error = %e, "workflow engine stopped with attempts still running"),
        }
    }

    /// Whether new work is accepted
    pub fn is_accepting(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire)
    }

    /// Dispatch pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.scheduler.pool().stats()
    }

    /// Instances currently driven by this engine
    pub fn live_instances(&self) -> usize {
        self.scheduler.live_count()
    }

    fn ensure_accepting(&self) -> Result<(), EngineError> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(EngineError::ShuttingDown)
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

//! # Taskloom Workflow Engine
//!
//! A multi-tenant engine that executes workflows described as directed
//! acyclic graphs of tasks.
//!
//! ## Features
//!
//! - **Validated graphs**: cycles, unknown and duplicate task ids are rejected before anything is stored
//! - **Parallel dispatch**: independent tasks run concurrently on a bounded, tenant-fair pool
//! - **Retries and timeouts**: fixed-delay retries and per-attempt deadlines per task
//! - **Lifecycle control**: start, pause, resume and cancel with an explicit state machine
//! - **Durable state**: every transition is written through to PostgreSQL or an in-memory store
//! - **Tenant isolation**: every operation is scoped to the caller's tenant
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (tenant-scoped facade: submit, lifecycle, status queries)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                             │
//! │  (per-instance state machine, readiness, retries, skips)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DispatchPool                            │
//! │  (bounded slots, per-tenant admission lanes)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              TaskExecutor → TaskHandler                      │
//! │  (deadline, panic guard, cancellation token per attempt)    │
//! └─────────────────────────────────────────────────────────────┘
//!
//!              WorkflowStore (PostgreSQL JSONB | in-memory)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use taskloom_engine::prelude::*;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("extract", |_ctx| async move {
//!     Ok(TaskOutput::new(json!({ "rows": 42 })).with_update("rows", json!(42)))
//! });
//! registry.register_fn("render", |ctx| async move {
//!     let rows = ctx.get("rows").cloned().unwrap_or_default();
//!     Ok(TaskOutput::new(json!({ "rendered": rows })))
//! });
//!
//! let definition = WorkflowDefinition::new("nightly_report", 1)
//!     .with_task(TaskDefinition::new("extract", "extract").with_retries(2, Duration::from_secs(1)))
//!     .with_task(TaskDefinition::new("render", "render").depends_on(["extract"]));
//!
//! let engine = WorkflowEngine::from_config(EngineConfig::from_env(), registry).await?;
//! let id = engine.submit(definition, "tenant-a").await?;
//! engine.start(id, "tenant-a").await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod handler;
pub mod persistence;
pub mod reliability;
pub mod telemetry;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{TaskError, WorkflowEngine, WorkflowEngineBuilder};
    pub use crate::error::EngineError;
    pub use crate::events::{
        CollectingEventListener, EngineEvent, EventListener, TracingEventListener,
    };
    pub use crate::graph::GraphError;
    pub use crate::handler::{HandlerError, HandlerRegistry, TaskContext, TaskHandler, TaskOutput};
    pub use crate::persistence::{
        InMemoryWorkflowStore, InstanceFilter, Pagination, PostgresWorkflowStore, StoreError,
        WorkflowStore,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::workflow::{
        TaskDefinition, TaskState, TaskStatus, WorkflowContext, WorkflowDefinition,
        WorkflowInstance, WorkflowStatus, WorkflowStatusReport,
    };
}

// Re-export key types at crate root
pub use config::EngineConfig;
pub use engine::{TaskExecutor, WorkflowEngine, WorkflowEngineBuilder};
pub use error::EngineError;
pub use events::{EngineEvent, EventListener};
pub use graph::{resolve, GraphError, TaskGraph};
pub use handler::{HandlerError, HandlerRegistry, TaskContext, TaskHandler, TaskOutput};
pub use persistence::{InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore};
pub use reliability::RetryPolicy;
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use workflow::{
    TaskDefinition, TaskState, TaskStatus, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
    WorkflowStatusReport,
};

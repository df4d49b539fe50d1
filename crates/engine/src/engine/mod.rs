//! Workflow execution engine
//!
//! - [`WorkflowEngine`]: tenant-scoped facade callers talk to
//! - `Scheduler`: drives live instances (dispatch, retries, finalization)
//! - [`TaskExecutor`]: runs single attempts under deadline and panic guards

mod executor;
mod facade;
mod scheduler;

pub use executor::{RetryDecision, TaskError, TaskExecutor, TaskResult};
pub use facade::{WorkflowEngine, WorkflowEngineBuilder};

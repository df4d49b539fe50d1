//! Persistence layer
//!
//! This module provides:
//! - [`WorkflowStore`] trait for tenant-scoped definition, instance and task state persistence
//! - [`InMemoryWorkflowStore`] for testing and database-less deployments
//! - [`PostgresWorkflowStore`] for durable deployments

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::{PostgresWorkflowStore, MIGRATOR};
pub use store::{InstanceFilter, Pagination, StoreError, WorkflowStore};

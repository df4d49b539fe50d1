//! Task dependency graph
//!
//! [`resolve`] validates a [`WorkflowDefinition`](crate::workflow::WorkflowDefinition)
//! and produces a [`TaskGraph`] with topological layers and a reverse
//! dependency index used to skip dependents of failed tasks.

mod resolver;

pub use resolver::{resolve, GraphError, TaskGraph};

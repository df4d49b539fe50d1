//! Workflow data model
//!
//! This module contains the records the engine persists:
//! - [`WorkflowDefinition`] and [`TaskDefinition`], the immutable templates
//! - [`WorkflowInstance`] and [`TaskState`], the mutable run state
//! - [`WorkflowStatusReport`], the snapshot returned by status queries

mod definition;
mod instance;

pub use definition::{DefinitionRef, TaskDefinition, WorkflowDefinition};
pub use instance::{
    AttemptOutcome, AttemptRecord, TaskFailure, TaskFailureKind, TaskState, TaskStatus,
    WorkflowContext, WorkflowInstance, WorkflowStatus, WorkflowStatusReport,
};

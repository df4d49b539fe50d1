//! Task handler abstractions
//!
//! Handlers are the caller-supplied logic behind each task. They:
//! - Are resolved by `handler_ref` through a [`HandlerRegistry`]
//! - May fail and be retried according to the task's retry policy
//! - Support cooperative cancellation via tokens

mod context;
mod definition;
mod registry;

pub use context::TaskContext;
pub use definition::{HandlerError, TaskHandler, TaskOutput};
pub use registry::HandlerRegistry;

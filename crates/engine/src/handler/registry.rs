//! Handler registry
//!
//! The registry maps opaque `handler_ref` strings to invocable handlers. It
//! is built by the embedding service and injected at engine construction;
//! the engine never interprets the keys.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::{HandlerError, TaskContext, TaskHandler, TaskOutput};

/// Adapter that lets a closure act as a [`TaskHandler`]
struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, HandlerError>> + Send + 'static,
{
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, HandlerError> {
        (self.func)(ctx.clone()).await
    }
}

/// Registry of task handlers keyed by `handler_ref`
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `handler_ref`, replacing any previous one
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = HandlerRegistry::new();
    /// registry.register("mail.send", SendMail::new(smtp));
    /// ```
    pub fn register<H: TaskHandler>(&mut self, handler_ref: impl Into<String>, handler: H) {
        self.handlers.insert(handler_ref.into(), Arc::new(handler));
    }

    /// Register a closure as a handler
    ///
    /// The closure receives an owned [`TaskContext`] so the returned future
    /// can be `'static`.
    pub fn register_fn<F, Fut>(&mut self, handler_ref: impl Into<String>, func: F)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutput, HandlerError>> + Send + 'static,
    {
        self.register(handler_ref, FnHandler { func });
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_handler<H: TaskHandler>(mut self, handler_ref: impl Into<String>, handler: H) -> Self {
        self.register(handler_ref, handler);
        self
    }

    /// Look up a handler
    pub fn get(&self, handler_ref: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(handler_ref).cloned()
    }

    /// Check if a handler is registered
    pub fn contains(&self, handler_ref: &str) -> bool {
        self.handlers.contains_key(handler_ref)
    }

    /// Get the number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Get all registered handler refs
    pub fn handler_refs(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut refs: Vec<_> = self.handlers.keys().collect();
        refs.sort();
        f.debug_struct("HandlerRegistry")
            .field("handler_refs", &refs)
            .finish()
    }
}

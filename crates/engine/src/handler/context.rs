//! Task execution context

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::workflow::WorkflowContext;

/// Context provided to handlers during execution
///
/// The context provides:
/// - Information about the current attempt
/// - A read-only snapshot of the instance context taken at dispatch
/// - The task's static input
/// - Cooperative cancellation (pause does not cancel; cancel and deadlines do)
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, HandlerError> {
///     for chunk in 0..100 {
///         if ctx.is_cancelled() {
///             return Err(HandlerError::non_retryable("cancelled"));
///         }
///         process(chunk).await?;
///     }
///     Ok(TaskOutput::new(json!({"chunks": 100})))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Instance that owns this task
    pub instance_id: Uuid,

    /// Tenant that owns the instance
    pub tenant_id: String,

    /// Task id within the definition
    pub task_id: String,

    /// Registry key the handler was resolved with
    pub handler_ref: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    /// Static input from the task definition
    pub input: Value,

    snapshot: Arc<WorkflowContext>,
    cancellation: CancellationToken,
}

impl TaskContext {
    /// Create a new task context
    pub fn new(
        instance_id: Uuid,
        tenant_id: impl Into<String>,
        task_id: impl Into<String>,
        handler_ref: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            instance_id,
            tenant_id: tenant_id.into(),
            task_id: task_id.into(),
            handler_ref: handler_ref.into(),
            attempt,
            max_attempts,
            input: Value::Null,
            snapshot: Arc::new(WorkflowContext::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Set the static input
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the instance context snapshot
    pub fn with_snapshot(mut self, snapshot: Arc<WorkflowContext>) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Use `token` for cancellation signals
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Read one key of the context snapshot
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.snapshot.get(key)
    }

    /// Full context snapshot
    pub fn context(&self) -> &WorkflowContext {
        &self.snapshot
    }

    /// Token signalled on cancel or deadline expiry
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Get a future that resolves when cancellation is requested
    ///
    /// This is useful for select! patterns:
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => { ... }
    ///     _ = ctx.cancelled() => {
    ///         return Err(HandlerError::non_retryable("cancelled"));
    ///     }
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(attempt: u32, max_attempts: u32) -> TaskContext {
        TaskContext::new(Uuid::now_v7(), "tenant-a", "step-1", "noop", attempt, max_attempts)
    }

    #[test]
    fn test_task_context_creation() {
        let instance_id = Uuid::now_v7();
        let ctx = TaskContext::new(instance_id, "tenant-a", "step-1", "noop", 1, 3);

        assert_eq!(ctx.instance_id, instance_id);
        assert_eq!(ctx.task_id, "step-1");
        assert_eq!(ctx.attempt, 1);
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_last_attempt());
        assert!(ctx.context().is_empty());
    }

    #[test]
    fn test_is_last_attempt() {
        assert!(ctx(3, 3).is_last_attempt());
        assert!(!ctx(2, 3).is_last_attempt());
    }

    #[test]
    fn test_snapshot_lookup() {
        let mut snapshot = WorkflowContext::new();
        snapshot.insert("region".into(), json!("eu-west"));
        let ctx = ctx(1, 1)
            .with_snapshot(Arc::new(snapshot))
            .with_input(json!({"limit": 10}));

        assert_eq!(ctx.get("region"), Some(&json!("eu-west")));
        assert_eq!(ctx.get("missing"), None);
        assert_eq!(ctx.input["limit"], 10);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        let ctx = ctx(1, 3).with_cancellation(token.child_token());

        assert!(!ctx.is_cancelled());
        token.cancel();

        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}

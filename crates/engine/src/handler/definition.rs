//! Task handler trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TaskContext;
use crate::workflow::WorkflowContext;

/// Error type for handler failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors immediately fail the task without further
    /// attempts, regardless of `max_retries`.
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<Value>,
}

impl HandlerError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{:#}", err))
    }
}

/// Successful handler result
///
/// `context_updates` is merged into the instance context after the task
/// completes (last writer wins per key). Failed attempts never merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Value stored as the task's `result`
    pub result: Value,

    /// Keys to write into the instance context
    #[serde(default)]
    pub context_updates: WorkflowContext,
}

impl TaskOutput {
    /// Output with a result and no context changes
    pub fn new(result: Value) -> Self {
        Self {
            result,
            context_updates: WorkflowContext::new(),
        }
    }

    /// Output with no result
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Add a context update
    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

impl From<Value> for TaskOutput {
    fn from(result: Value) -> Self {
        Self::new(result)
    }
}

/// A handler is the invocable logic behind a task's `handler_ref`
///
/// Handlers:
/// - Receive a context snapshot, never a mutable context
/// - May fail and be retried according to the task's retry policy
/// - Should observe [`TaskContext::cancelled`] for long-running work
/// - Must tolerate re-execution (delivery is at-least-once)
///
/// # Example
///
/// ```ignore
/// use taskloom_engine::prelude::*;
///
/// struct SendInvoice;
///
/// #[async_trait]
/// impl TaskHandler for SendInvoice {
///     async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, HandlerError> {
///         let customer = ctx.get("customer_id").cloned().unwrap_or_default();
///         let id = invoices::send(customer).await?;
///         Ok(TaskOutput::new(json!({"invoice_id": id})).with_update("invoice_id", json!(id)))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute one attempt of the task
    ///
    /// # Errors
    ///
    /// Return `HandlerError::retryable()` for transient failures that should be retried.
    /// Return `HandlerError::non_retryable()` for permanent failures.
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handler_error_retryable() {
        let error = HandlerError::retryable("timeout");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "timeout");
    }

    #[test]
    fn test_handler_error_non_retryable() {
        let error = HandlerError::non_retryable("invalid input").with_type("VALIDATION");
        assert!(!error.retryable);
        assert_eq!(error.to_string(), "VALIDATION: invalid input");
    }

    #[test]
    fn test_from_anyhow_is_retryable() {
        let err = anyhow::anyhow!("connection reset").context("fetching rates");
        let error = HandlerError::from(err);

        assert!(error.retryable);
        assert_eq!(error.message, "fetching rates: connection reset");
    }

    #[test]
    fn test_handler_error_serialization() {
        let error = HandlerError::retryable("test error")
            .with_type("TEST")
            .with_details(json!({"key": "value"}));

        let json = serde_json::to_string(&error).unwrap();
        let parsed: HandlerError = serde_json::from_str(&json).unwrap();

        assert_eq!(error, parsed);
    }

    #[test]
    fn test_task_output_updates() {
        let output = TaskOutput::new(json!(42))
            .with_update("total", json!(42))
            .with_update("currency", json!("EUR"));

        assert_eq!(output.result, json!(42));
        assert_eq!(output.context_updates.len(), 2);
        assert_eq!(TaskOutput::empty().result, Value::Null);
    }
}

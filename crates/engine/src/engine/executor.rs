//! Task executor
//!
//! The `TaskExecutor` is responsible for:
//! - Resolving a task's handler through the registry
//! - Running one attempt under the task's deadline
//! - Turning handler errors, timeouts and panics into [`TaskError`]
//! - Deciding whether a failed attempt is retried
//!
//! The scheduler drives attempts one at a time through [`TaskExecutor::run_attempt`]
//! and schedules retries itself, so a retry delay never holds a dispatch slot.
//! [`TaskExecutor::execute`] runs the whole retry loop inline for callers that
//! want a single task outside of a workflow.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::handler::{HandlerError, HandlerRegistry, TaskContext, TaskOutput};
use crate::reliability::{effective_timeout, with_deadline, TimeoutError};
use crate::workflow::{
    AttemptOutcome, AttemptRecord, TaskDefinition, TaskFailure, TaskFailureKind, TaskState,
    TaskStatus,
};

/// Errors from a single attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The handler returned an error
    #[error("{0}")]
    Handler(HandlerError),

    /// The attempt ran past its deadline
    #[error("task timed out after {limit:?}")]
    Timeout { limit: Duration },

    /// No handler registered for the task's `handler_ref`
    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Whether another attempt may succeed
    ///
    /// Timeouts are retried like execution errors; a missing handler or a
    /// panic will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler(err) => err.retryable,
            Self::Timeout { .. } => true,
            Self::UnknownHandler(_) | Self::Panicked(_) => false,
        }
    }

    pub fn kind(&self) -> TaskFailureKind {
        match self {
            Self::Handler(_) => TaskFailureKind::Handler,
            Self::Timeout { .. } => TaskFailureKind::Timeout,
            Self::UnknownHandler(_) => TaskFailureKind::UnknownHandler,
            Self::Panicked(_) => TaskFailureKind::Panicked,
        }
    }

    /// Record shape stored on the task state
    pub fn to_failure(&self, attempt: u32) -> TaskFailure {
        TaskFailure {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            attempt,
        }
    }
}

impl From<HandlerError> for TaskError {
    fn from(err: HandlerError) -> Self {
        Self::Handler(err)
    }
}

impl From<TimeoutError> for TaskError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::DeadlineExceeded { limit } => Self::Timeout { limit },
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run another attempt after `delay`
    Retry { delay: Duration },
    /// The task has failed terminally
    GiveUp,
}

/// Outcome of [`TaskExecutor::execute`]
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Final task state, including every attempt in `history`
    pub state: TaskState,

    /// Output of the successful attempt, if any
    pub output: Option<TaskOutput>,
}

/// Runs task attempts against the handler registry
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    registry: HandlerRegistry,
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Create an executor without a default timeout
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            default_timeout: None,
        }
    }

    /// Deadline applied to tasks that do not set their own
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run a single attempt
    ///
    /// The handler is raced against the effective deadline. On expiry the
    /// context's cancellation token is triggered before the attempt is
    /// abandoned. A panic inside the handler is caught and reported as
    /// [`TaskError::Panicked`].
    pub async fn run_attempt(
        &self,
        task: &TaskDefinition,
        ctx: &TaskContext,
    ) -> Result<TaskOutput, TaskError> {
        let handler = self
            .registry
            .get(&task.handler_ref)
            .ok_or_else(|| TaskError::UnknownHandler(task.handler_ref.clone()))?;

        let limit = effective_timeout(task.timeout, self.default_timeout);
        let attempt = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();

        match with_deadline(limit, ctx.cancellation_token(), attempt).await? {
            Ok(result) => result.map_err(TaskError::Handler),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Decide whether `attempt` (1-based) is followed by another one
    pub fn retry_decision(
        &self,
        task: &TaskDefinition,
        attempt: u32,
        error: &TaskError,
    ) -> RetryDecision {
        let policy = task.retry_policy();
        if error.is_retryable() && policy.has_attempts_remaining(attempt) {
            RetryDecision::Retry {
                delay: policy.delay_for_attempt(attempt + 1),
            }
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Run a task to a terminal state, retrying inline
    ///
    /// `base` supplies the instance identity, context snapshot and
    /// cancellation token; attempt numbers are filled in per attempt. When
    /// the base token is cancelled the loop stops and the task ends
    /// `CANCELLED`.
    #[instrument(skip(self, task, base), fields(task_id = %task.id, handler_ref = %task.handler_ref))]
    pub async fn execute(&self, task: &TaskDefinition, base: TaskContext) -> TaskResult {
        let max_attempts = task.retry_policy().max_attempts();
        let root = base.cancellation_token().clone();
        let mut state = TaskState::pending(&task.id);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started_at = Utc::now();
            state.status = TaskStatus::Running;
            state.attempt_count = attempt;
            state.started_at.get_or_insert(started_at);

            let mut ctx = base.clone().with_cancellation(root.child_token());
            ctx.attempt = attempt;
            ctx.max_attempts = max_attempts;

            let result = self.run_attempt(task, &ctx).await;
            let finished_at = Utc::now();

            let error = match result {
                Ok(output) => {
                    state.history.push(AttemptRecord {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: AttemptOutcome::Completed,
                        error: None,
                    });
                    state.status = TaskStatus::Completed;
                    state.result = Some(output.result.clone());
                    state.error = None;
                    state.finished_at = Some(finished_at);
                    debug!(attempt, "task completed");
                    return TaskResult {
                        state,
                        output: Some(output),
                    };
                }
                Err(error) => error,
            };

            let failure = error.to_failure(attempt);
            state.history.push(AttemptRecord {
                attempt,
                started_at,
                finished_at,
                outcome: AttemptOutcome::Failed,
                error: Some(failure.clone()),
            });
            state.error = Some(failure);

            if root.is_cancelled() {
                state.status = TaskStatus::Cancelled;
                state.finished_at = Some(finished_at);
                return TaskResult {
                    state,
                    output: None,
                };
            }

            match self.retry_decision(task, attempt, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(attempt, error = %error, ?delay, "task attempt failed, retrying");
                    state.status = TaskStatus::Pending;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = root.cancelled() => {
                            state.status = TaskStatus::Cancelled;
                            state.finished_at = Some(Utc::now());
                            return TaskResult { state, output: None };
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(attempt, error = %error, "task failed");
                    state.status = TaskStatus::Failed;
                    state.finished_at = Some(finished_at);
                    return TaskResult {
                        state,
                        output: None,
                    };
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

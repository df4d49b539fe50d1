//! Attempt deadlines
//!
//! A deadline races the attempt future against a timer. When the timer wins
//! the attempt's cancellation token is triggered so a cooperative handler can
//! stop its own work, and the attempt future is dropped.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Deadline-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    /// The attempt ran past its deadline
    #[error("attempt timed out after {limit:?}")]
    DeadlineExceeded { limit: Duration },
}

/// Run `fut` under an optional deadline
///
/// With `limit == None` the future runs to completion. Otherwise the future
/// is raced against `limit`; on expiry `token` is cancelled and
/// [`TimeoutError::DeadlineExceeded`] is returned.
pub async fn with_deadline<F, T>(
    limit: Option<Duration>,
    token: &CancellationToken,
    fut: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    let Some(limit) = limit else {
        return Ok(fut.await);
    };

    tokio::select! {
        output = fut => Ok(output),
        _ = tokio::time::sleep(limit) => {
            token.cancel();
            Err(TimeoutError::DeadlineExceeded { limit })
        }
    }
}

/// Pick the effective deadline: the task's own, else the engine default
pub fn effective_timeout(task: Option<Duration>, default: Option<Duration>) -> Option<Duration> {
    task.or(default)
}

//! Reliability patterns for task execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Fixed-delay retry configuration
//! - [`with_deadline`] - Deadline race with cooperative cancellation

mod retry;
mod timeout;

pub(crate) use retry::duration_millis;
pub use retry::RetryPolicy;
pub use timeout::{effective_timeout, with_deadline, TimeoutError};

//! Engine configuration

use std::time::Duration;

use crate::worker::DispatchPoolConfig;

/// Configuration for [`WorkflowEngine`](crate::WorkflowEngine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum concurrent task attempts across all tenants
    pub max_concurrency: usize,

    /// Maximum attempts waiting for an execution slot
    pub queue_capacity: usize,

    /// Deadline for tasks that do not set their own `timeout`
    pub default_task_timeout: Option<Duration>,

    /// How long `shutdown` waits for in-flight attempts
    pub shutdown_timeout: Duration,

    /// Store polling interval used by `wait_for_terminal`
    pub status_poll_interval: Duration,

    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            queue_capacity: 1024,
            default_task_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
            status_poll_interval: Duration::from_millis(25),
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TASKLOOM_MAX_CONCURRENCY`: Execution slots (default: 16)
    /// - `TASKLOOM_QUEUE_CAPACITY`: Admission queue bound (default: 1024)
    /// - `TASKLOOM_DEFAULT_TASK_TIMEOUT_MS`: Default per-attempt deadline (default: none)
    /// - `TASKLOOM_SHUTDOWN_TIMEOUT_MS`: Graceful shutdown budget (default: 30000)
    /// - `TASKLOOM_STATUS_POLL_MS`: `wait_for_terminal` poll interval (default: 25)
    /// - `DATABASE_URL`: PostgreSQL connection string
    ///
    /// Unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            max_concurrency: number("TASKLOOM_MAX_CONCURRENCY")
                .filter(|n| *n > 0)
                .map_or(defaults.max_concurrency, |n| n as usize),
            queue_capacity: number("TASKLOOM_QUEUE_CAPACITY")
                .filter(|n| *n > 0)
                .map_or(defaults.queue_capacity, |n| n as usize),
            default_task_timeout: number("TASKLOOM_DEFAULT_TASK_TIMEOUT_MS")
                .filter(|n| *n > 0)
                .map(Duration::from_millis),
            shutdown_timeout: number("TASKLOOM_SHUTDOWN_TIMEOUT_MS")
                .map_or(defaults.shutdown_timeout, Duration::from_millis),
            status_poll_interval: number("TASKLOOM_STATUS_POLL_MS")
                .filter(|n| *n > 0)
                .map_or(defaults.status_poll_interval, Duration::from_millis),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
        }
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set admission queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the default task timeout
    pub fn with_default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout = Some(timeout);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the `wait_for_terminal` poll interval
    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = interval;
        self
    }

    /// Use PostgreSQL at `url`
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub(crate) fn pool_config(&self) -> DispatchPoolConfig {
        DispatchPoolConfig::default()
            .with_max_concurrency(self.max_concurrency)
            .with_queue_capacity(self.queue_capacity)
    }
}

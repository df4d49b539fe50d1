// Telemetry Module
//
// Console tracing for the engine and the services embedding it:
// - Configuration from environment variables
// - Idempotent subscriber initialisation (safe to call from tests)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for tracing output
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "taskloom_engine=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "taskloom".to_string(),
            enable_console: true,
            log_filter: None,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TASKLOOM_SERVICE_NAME`: Service name (default: "taskloom")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `TASKLOOM_LOG_JSON`: "true" for JSON output
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            service_name: lookup("TASKLOOM_SERVICE_NAME").unwrap_or_else(|| "taskloom".to_string()),
            enable_console: true,
            log_filter: lookup("RUST_LOG").or_else(|| lookup("LOG_LEVEL")),
            json: lookup("TASKLOOM_LOG_JSON")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }
}

/// Telemetry initialisation errors
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The log filter could not be parsed
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    /// Another global subscriber is already installed
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global tracing subscriber
///
/// # Example
///
/// ```ignore
/// use taskloom_engine::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env()).ok();
///     // ... your application code
/// }
/// ```
///
/// # Errors
///
/// [`TelemetryError::AlreadyInitialized`] when a subscriber is already set;
/// callers that may run twice (tests) can ignore it.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = match &config.log_filter {
        Some(f) => EnvFilter::try_new(f).map_err(|e| TelemetryError::InvalidFilter {
            filter: f.clone(),
            message: e.to_string(),
        })?,
        None => EnvFilter::new("info"),
    };

    let console_layer = if config.enable_console {
        let layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer().with_target(true).boxed()
        };
        Some(layer.with_filter(filter))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing::debug!(service = %config.service_name, "telemetry initialized");
    Ok(())
}

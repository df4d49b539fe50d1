// Lifecycle events
//
// The engine publishes a structured fact for every workflow and task
// transition. Listeners plug in audit logging, metrics or notifications
// without the engine depending on any of them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Event Types
// ============================================================================

/// Event type names
pub mod event_types {
    pub const WORKFLOW_SUBMITTED: &str = "workflow.submitted";
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_PAUSED: &str = "workflow.paused";
    pub const WORKFLOW_RESUMED: &str = "workflow.resumed";
    pub const WORKFLOW_CANCEL_REQUESTED: &str = "workflow.cancel_requested";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const WORKFLOW_CANCELLED: &str = "workflow.cancelled";

    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_RETRYING: &str = "task.retrying";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_SKIPPED: &str = "task.skipped";
    pub const TASK_CANCELLED: &str = "task.cancelled";
}

/// A lifecycle fact about an instance or one of its tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Unique event id (UUID v7, time-ordered)
    pub id: Uuid,
    /// One of [`event_types`]
    pub event_type: String,
    pub tenant_id: String,
    pub instance_id: Uuid,
    /// Set for `task.*` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Event-specific payload
    #[serde(default)]
    pub data: Value,
    pub occurred_at: DateTime<Utc>,
}

impl EngineEvent {
    /// Event about a whole instance
    pub fn workflow(event_type: &str, tenant_id: &str, instance_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            tenant_id: tenant_id.to_string(),
            instance_id,
            task_id: None,
            data: Value::Null,
            occurred_at: Utc::now(),
        }
    }

    /// Event about one task of an instance
    pub fn task(event_type: &str, tenant_id: &str, instance_id: Uuid, task_id: &str) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            ..Self::workflow(event_type, tenant_id, instance_id)
        }
    }

    /// Attach a payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

// ============================================================================
// EventListener Trait
// ============================================================================

/// Trait for listening to engine events.
///
/// Listeners are awaited in registration order while the instance's
/// transition is being applied, so they observe events of one instance in
/// order. They should be fast and non-blocking; spawn for heavy work.
///
/// # Re-entrancy
///
/// `on_event` runs while the engine holds the instance's lock. Reading the
/// store (or calling `get_status`) from a listener is fine. Calling `start`,
/// `pause`, `resume` or `cancel` on the same instance and awaiting it inside
/// `on_event` deadlocks; spawn such calls onto a separate task instead.
///
/// # Example
///
/// ```ignore
/// use taskloom_engine::events::{EngineEvent, EventListener};
///
/// struct AuditForwarder { sink: AuditSink }
///
/// #[async_trait]
/// impl EventListener for AuditForwarder {
///     async fn on_event(&self, event: &EngineEvent) {
///         self.sink.record(event.clone());
///     }
/// }
/// ```
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Called after the transition behind `event` was written to the store.
    async fn on_event(&self, event: &EngineEvent);

    /// Optional: Filter which event types this listener cares about.
    ///
    /// Return `None` to receive all events (default).
    fn event_types(&self) -> Option<Vec<&'static str>> {
        None
    }

    /// Human-readable name for logging/debugging.
    fn name(&self) -> &'static str {
        "EventListener"
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Fan-out to every registered listener, honouring their type filters
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn add(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `event` to every interested listener
    pub async fn emit(&self, event: EngineEvent) {
        for listener in &self.listeners {
            if let Some(types) = listener.event_types() {
                if !types.contains(&event.event_type.as_str()) {
                    continue;
                }
            }
            listener.on_event(&event).await;
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "listeners",
                &self.listeners.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// Built-in listeners
// ============================================================================

/// Logs every event through `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingEventListener;

#[async_trait]
impl EventListener for TracingEventListener {
    async fn on_event(&self, event: &EngineEvent) {
        tracing::info!(
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            instance_id = %event.instance_id,
            task_id = event.task_id.as_deref().unwrap_or(""),
            data = %event.data,
            "engine event"
        );
    }

    fn name(&self) -> &'static str {
        "TracingEventListener"
    }
}

/// Keeps every event in memory; intended for tests and diagnostics
#[derive(Debug, Default)]
pub struct CollectingEventListener {
    events: Mutex<Vec<EngineEvent>>,
}

impl CollectingEventListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Event types received for one instance, in order
    pub fn types_for(&self, instance_id: Uuid) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventListener for CollectingEventListener {
    async fn on_event(&self, event: &EngineEvent) {
        self.events.lock().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "CollectingEventListener"
    }
}

// ============================================================================
// Tests
// ============================================================================

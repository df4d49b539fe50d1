//! Workflow and task definitions

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Reference from an instance to the definition it executes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionRef {
    /// Definition name
    pub name: String,

    /// Definition version
    pub version: u32,
}

impl DefinitionRef {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// A unit of work inside a workflow definition
///
/// The engine never interprets `handler_ref`; it is resolved through the
/// [`HandlerRegistry`](crate::handler::HandlerRegistry) supplied at engine
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task id, unique within the definition
    pub id: String,

    /// Registry key of the handler that runs this task
    pub handler_ref: String,

    /// Ids of tasks that must complete before this one is dispatched
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    /// Retries after the first attempt
    #[serde(default)]
    pub max_retries: u32,

    /// Fixed delay between attempts
    #[serde(default, with = "crate::reliability::duration_millis")]
    pub retry_delay: Duration,

    /// Per-attempt deadline
    #[serde(default, with = "option_duration_millis")]
    pub timeout: Option<Duration>,

    /// Static parameters handed to the handler
    #[serde(default)]
    pub input: serde_json::Value,
}

impl TaskDefinition {
    /// Create a task with no dependencies, no retries and no timeout
    pub fn new(id: impl Into<String>, handler_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handler_ref: handler_ref.into(),
            depends_on: BTreeSet::new(),
            max_retries: 0,
            retry_delay: Duration::ZERO,
            timeout: None,
            input: serde_json::Value::Null,
        }
    }

    /// Add dependencies
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Set the retry policy
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the static handler input
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Retry policy derived from `max_retries` and `retry_delay`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.retry_delay)
    }
}

/// Immutable workflow template
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use taskloom_engine::workflow::{TaskDefinition, WorkflowDefinition};
///
/// let definition = WorkflowDefinition::new("nightly_report", 1)
///     .with_task(TaskDefinition::new("extract", "db.extract"))
///     .with_task(TaskDefinition::new("render", "report.render").depends_on(["extract"]))
///     .with_task(
///         TaskDefinition::new("deliver", "mail.send")
///             .depends_on(["render"])
///             .with_retries(3, Duration::from_secs(5)),
///     );
///
/// assert_eq!(definition.tasks.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Definition name
    pub name: String,

    /// Definition version
    pub version: u32,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    /// Create an empty definition
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            tasks: vec![],
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a task
    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    /// Reference used by instances of this definition
    pub fn reference(&self) -> DefinitionRef {
        DefinitionRef::new(self.name.clone(), self.version)
    }

    /// Look up a task by id
    pub fn task(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == task_id)
    }
}

/// Serde support for Option<Duration>
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_builder() {
        let task = TaskDefinition::new("render", "report.render")
            .depends_on(["extract", "load"])
            .with_retries(2, Duration::from_millis(250))
            .with_timeout(Duration::from_secs(5))
            .with_input(json!({"format": "pdf"}));

        assert_eq!(task.depends_on.len(), 2);
        assert!(task.depends_on.contains("extract"));
        assert_eq!(task.max_retries, 2);
        assert_eq!(task.retry_policy().max_attempts(), 3);
        assert_eq!(task.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_definition_from_json_uses_defaults() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "name": "etl",
            "version": 2,
            "tasks": [
                {"id": "a", "handler_ref": "noop"},
                {"id": "b", "handler_ref": "noop", "depends_on": ["a"], "max_retries": 1,
                 "retry_delay": 1500, "timeout": 2000}
            ]
        }))
        .unwrap();

        let a = definition.task("a").unwrap();
        assert!(a.depends_on.is_empty());
        assert_eq!(a.retry_delay, Duration::ZERO);
        assert_eq!(a.timeout, None);

        let b = definition.task("b").unwrap();
        assert_eq!(b.retry_delay, Duration::from_millis(1500));
        assert_eq!(b.timeout, Some(Duration::from_secs(2)));
        assert_eq!(definition.reference().to_string(), "etl@v2");
    }

    #[test]
    fn test_duration_fields_serialize_as_millis() {
        let task = TaskDefinition::new("a", "noop").with_retries(1, Duration::from_secs(2));
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["retry_delay"], json!(2000));
        assert_eq!(value["timeout"], json!(null));
    }
}

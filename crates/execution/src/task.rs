use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;

/// Error type for task execution. Serializable so it can travel back from a
/// remote node inside an archived outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("{failed} of {total} grouped tasks failed, first error: {first}")]
    Group {
        failed: usize,
        total: usize,
        first: String,
    },
    #[error("Task cannot be distributed: {0}")]
    NotDistributable(String),
    #[error("Task not sent: {0}")]
    NotSent(String),
    #[error("Remote task crashed: {0}")]
    Crashed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What running a task produces: a JSON result or an error, never a panic
/// crossing the context boundary.
pub type TaskOutcome = Result<Value, TaskError>;

/// Serialized form of a task, rebuilt on a remote node through a
/// [`TaskRegistry`](crate::registry::TaskRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Registry key identifying the concrete task type.
    pub kind: String,
    /// Task parameters.
    pub body: Value,
}

impl TaskPayload {
    pub fn new<T: Serialize>(kind: impl Into<String>, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.into(),
            body: serde_json::to_value(body)?,
        })
    }
}

/// A unit of work the execution contexts can run.
pub trait Task: Send + Sync {
    /// Short display name, used as the scope description.
    fn name(&self) -> &str;

    /// Execute the task. Nested work goes through `context`.
    fn run(&self, context: &mut dyn ExecutionContext) -> TaskOutcome;

    /// Serialized form for remote execution. Tasks returning `None` can only
    /// run locally.
    fn payload(&self) -> Option<TaskPayload> {
        None
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.name())
    }
}

/// Task built from a name and a closure.
pub struct FnTask<F> {
    name: String,
    body: F,
}

impl<F> FnTask<F>
where
    F: Fn(&mut dyn ExecutionContext) -> TaskOutcome + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Build the task directly behind an `Arc<dyn Task>`.
    pub fn shared(name: impl Into<String>, body: F) -> Arc<dyn Task> {
        Arc::new(Self::new(name, body))
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&mut dyn ExecutionContext) -> TaskOutcome + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut dyn ExecutionContext) -> TaskOutcome {
        (self.body)(context)
    }
}

/// An ordered, finite collection of tasks executed as one unit.
#[derive(Clone)]
pub struct TaskGroup {
    name: String,
    tasks: Vec<Arc<dyn Task>>,
    push_children_into_stack: bool,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            push_children_into_stack: true,
        }
    }

    pub fn with_tasks(name: impl Into<String>, tasks: Vec<Arc<dyn Task>>) -> Self {
        Self {
            tasks,
            ..Self::new(name)
        }
    }

    /// Members run without opening their own scope frame.
    pub fn without_child_scopes(mut self) -> Self {
        self.push_children_into_stack = false;
        self
    }

    pub fn push(&mut self, task: Arc<dyn Task>) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn push_children_into_stack(&self) -> bool {
        self.push_children_into_stack
    }

    /// Fold per-member outcomes into the outcome of the group as a whole.
    pub fn aggregate(outcomes: &[TaskOutcome]) -> TaskOutcome {
        let failures: Vec<&TaskError> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
        match failures.first() {
            None => Ok(Value::Array(
                outcomes.iter().filter_map(|o| o.as_ref().ok().cloned()).collect(),
            )),
            Some(first) => Err(TaskError::Group {
                failed: failures.len(),
                total: outcomes.len(),
                first: first.to_string(),
            }),
        }
    }
}

impl Task for TaskGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut dyn ExecutionContext) -> TaskOutcome {
        let outcomes = context.run_group(self, false);
        Self::aggregate(&outcomes)
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", &self.name)
            .field("len", &self.tasks.len())
            .field("push_children_into_stack", &self.push_children_into_stack)
            .finish()
    }
}

/// Progress report emitted by long-running tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub value: f64,
    pub total: Option<f64>,
    pub unit: String,
}

impl ProgressState {
    pub fn new(value: f64, total: Option<f64>, unit: impl Into<String>) -> Self {
        Self {
            value,
            total,
            unit: unit.into(),
        }
    }

    /// Completed fraction when the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0.0)
            .map(|total| (self.value / total).clamp(0.0, 1.0))
    }
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aggregate_all_ok_keeps_order() {
        let outcomes = vec![Ok(json!(1)), Ok(json!("two")), Ok(json!(3.0))];
        assert_eq!(TaskGroup::aggregate(&outcomes), Ok(json!([1, "two", 3.0])));
    }

    #[test]
    fn aggregate_reports_first_failure() {
        let outcomes = vec![
            Ok(json!(1)),
            Err(TaskError::failed("boom")),
            Err(TaskError::failed("later")),
        ];
        match TaskGroup::aggregate(&outcomes) {
            Err(TaskError::Group { failed, total, first }) => {
                assert_eq!(failed, 2);
                assert_eq!(total, 3);
                assert!(first.contains("boom"));
            }
            other => panic!("expected group error, got {:?}", other),
        }
    }

    #[test]
    fn empty_group_aggregates_to_empty_array() {
        assert_eq!(TaskGroup::aggregate(&[]), Ok(json!([])));
        assert!(TaskGroup::new("empty").is_empty());
    }

    #[test]
    fn payload_serializes_body() {
        #[derive(Serialize)]
        struct Params {
            depth: u32,
        }
        let payload = TaskPayload::new("train", &Params { depth: 3 }).unwrap();
        assert_eq!(payload.kind, "train");
        assert_eq!(payload.body, json!({"depth": 3}));
    }

    #[test]
    fn task_error_roundtrips_through_json() {
        let outcome: TaskOutcome = Err(TaskError::Crashed("node lost".into()));
        let text = serde_json::to_string(&outcome).unwrap();
        let back: TaskOutcome = serde_json::from_str(&text).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn progress_fraction() {
        assert_eq!(ProgressState::new(5.0, Some(10.0), "items").fraction(), Some(0.5));
        assert_eq!(ProgressState::new(5.0, None, "items").fraction(), None);
        assert_eq!(ProgressState::new(5.0, Some(0.0), "items").fraction(), None);
        assert_eq!(ProgressState::new(15.0, Some(10.0), "items").fraction(), Some(1.0));
    }

    #[test]
    fn panic_message_extracts_strings() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }
}

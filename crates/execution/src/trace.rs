use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::callback::{ExecutionCallback, MessageLevel};
use crate::context::ExecutionContext;
use crate::stack::{ExecutionStack, ScopeFrame};
use crate::task::{ProgressState, Task, TaskOutcome, TaskPayload};

/// Entry of a recorded scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceNode {
    Scope(TraceScope),
    Result {
        name: String,
        value: Value,
    },
    Message {
        level: MessageLevel,
        location: String,
        what: String,
    },
}

/// A scope as it was observed: when it opened, how long it ran, what it
/// produced in between and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceScope {
    pub description: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the scope is still open.
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    /// Last progress reported inside the scope.
    #[serde(default)]
    pub progress: Option<ProgressState>,
    #[serde(default)]
    pub children: Vec<TraceNode>,
}

impl TraceScope {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            started_at: Utc::now(),
            elapsed_ms: None,
            outcome: None,
            progress: None,
            children: Vec::new(),
        }
    }

    /// Direct child scopes.
    pub fn scopes(&self) -> impl Iterator<Item = &TraceScope> {
        self.children.iter().filter_map(|node| match node {
            TraceNode::Scope(scope) => Some(scope),
            _ => None,
        })
    }

    /// Results emitted directly inside this scope.
    pub fn results(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.children.iter().filter_map(|node| match node {
            TraceNode::Result { name, value } => Some((name.as_str(), value)),
            _ => None,
        })
    }

    /// First scope named `description`, depth first, this one included.
    pub fn find(&self, description: &str) -> Option<&TraceScope> {
        if self.description == description {
            return Some(self);
        }
        self.scopes().find_map(|scope| scope.find(description))
    }

    /// Scopes in this subtree, this one included.
    pub fn num_scopes(&self) -> usize {
        1 + self.scopes().map(TraceScope::num_scopes).sum::<usize>()
    }
}

/// Tree of everything observed while a task ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub root: TraceScope,
}

impl ExecutionTrace {
    pub fn find(&self, description: &str) -> Option<&TraceScope> {
        self.root.find(description)
    }

    pub fn num_scopes(&self) -> usize {
        self.root.num_scopes()
    }
}

/// Observer recording an [`ExecutionTrace`].
///
/// Events must come from a single context; members of a group spread over a
/// pool only show up through the group's own scope.
pub struct TraceCallback {
    open: Mutex<Vec<TraceScope>>,
}

impl TraceCallback {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            open: Mutex::new(vec![TraceScope::new(description)]),
        }
    }

    fn open(&self) -> MutexGuard<'_, Vec<TraceScope>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trace recorded so far. Scopes still open are included without an
    /// outcome.
    pub fn snapshot(&self) -> ExecutionTrace {
        let mut open = self.open().clone();
        while open.len() > 1 {
            if let Some(scope) = open.pop() {
                if let Some(parent) = open.last_mut() {
                    parent.children.push(TraceNode::Scope(scope));
                }
            }
        }
        let root = open.pop().unwrap_or_else(|| TraceScope::new("trace"));
        ExecutionTrace { root }
    }

    fn push_node(&self, node: TraceNode) {
        if let Some(top) = self.open().last_mut() {
            top.children.push(node);
        }
    }
}

impl ExecutionCallback for TraceCallback {
    fn pre_execution(&self, _stack: &ExecutionStack, description: &str, _task: Option<&Arc<dyn Task>>) {
        self.open().push(TraceScope::new(description));
    }

    fn post_execution(&self, _stack: &ExecutionStack, frame: &ScopeFrame, outcome: &TaskOutcome) {
        let mut open = self.open();
        if open.len() < 2 {
            warn!(scope = %frame.description, "trace saw a scope close that it never saw open");
            return;
        }
        if let Some(mut scope) = open.pop() {
            scope.elapsed_ms = Some(frame.elapsed().as_millis() as u64);
            scope.outcome = Some(outcome.clone());
            if let Some(parent) = open.last_mut() {
                parent.children.push(TraceNode::Scope(scope));
            }
        }
    }

    fn progress(&self, _stack: &ExecutionStack, progress: &ProgressState) {
        if let Some(top) = self.open().last_mut() {
            top.progress = Some(progress.clone());
        }
    }

    fn result(&self, _stack: &ExecutionStack, name: &str, value: &Value) {
        self.push_node(TraceNode::Result {
            name: name.to_string(),
            value: value.clone(),
        });
    }

    fn message(&self, level: MessageLevel, location: &str, what: &str) {
        self.push_node(TraceNode::Message {
            level,
            location: location.to_string(),
            what: what.to_string(),
        });
    }
}

/// Runs the wrapped task with a [`TraceCallback`] attached to the context
/// it runs in, for the duration of the run.
pub struct TracedTask {
    inner: Arc<dyn Task>,
    recorder: Arc<TraceCallback>,
}

impl TracedTask {
    pub fn new(inner: Arc<dyn Task>, recorder: Arc<TraceCallback>) -> Self {
        Self { inner, recorder }
    }

    pub fn shared(inner: Arc<dyn Task>, recorder: Arc<TraceCallback>) -> Arc<dyn Task> {
        Arc::new(Self::new(inner, recorder))
    }
}

impl Task for TracedTask {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run(&self, context: &mut dyn ExecutionContext) -> TaskOutcome {
        let recorder: Arc<dyn ExecutionCallback> = self.recorder.clone();
        context.append_callback(Arc::clone(&recorder));
        let outcome = context.run(Arc::clone(&self.inner), true);
        context.remove_callback(&recorder);
        outcome
    }

    fn payload(&self) -> Option<TaskPayload> {
        self.inner.payload()
    }
}

/// Run `task` in `context` and return its outcome with the trace of the run.
pub fn run_traced(context: &mut dyn ExecutionContext, task: Arc<dyn Task>) -> (TaskOutcome, ExecutionTrace) {
    let recorder = Arc::new(TraceCallback::new(context.describe()));
    let outcome = context.run(TracedTask::shared(task, Arc::clone(&recorder)), false);
    (outcome, recorder.snapshot())
}

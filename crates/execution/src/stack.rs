use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::task::Task;

/// One entry of an execution stack.
#[derive(Clone)]
pub struct ScopeFrame {
    pub description: String,
    /// Task that opened the scope, if the scope belongs to a task.
    pub task: Option<Arc<dyn Task>>,
    entered_at: Instant,
}

impl ScopeFrame {
    pub fn new(description: impl Into<String>, task: Option<Arc<dyn Task>>) -> Self {
        Self {
            description: description.into(),
            task,
            entered_at: Instant::now(),
        }
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    pub fn elapsed(&self) -> Duration {
        self.entered_at.elapsed()
    }
}

impl fmt::Debug for ScopeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeFrame")
            .field("description", &self.description)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

/// Nested-scope stack of an execution context.
///
/// A stack created for a worker thread chains to an immutable snapshot of the
/// stack that pushed the work, so `depth()` and `entry()` see the full path
/// from the root while `push`/`pop` only touch the local frames.
#[derive(Clone, Default)]
pub struct ExecutionStack {
    parent: Option<Arc<ExecutionStack>>,
    frames: Vec<ScopeFrame>,
}

impl ExecutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty local stack continuing from `parent`.
    pub fn with_parent(parent: Arc<ExecutionStack>) -> Self {
        Self {
            parent: Some(parent),
            frames: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<&Arc<ExecutionStack>> {
        self.parent.as_ref()
    }

    fn parent_depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.depth())
    }

    /// Total depth including the parent chain.
    pub fn depth(&self) -> usize {
        self.parent_depth() + self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Number of frames owned by this stack, excluding the parent chain.
    pub fn local_len(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    /// Pop a local frame. Frames inherited from the parent are never popped.
    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    /// Innermost frame, looking through to the parent when nothing is local.
    pub fn top(&self) -> Option<&ScopeFrame> {
        match self.frames.last() {
            Some(frame) => Some(frame),
            None => self.parent.as_ref().and_then(|p| p.top()),
        }
    }

    /// Frame at `depth`, 0 being the outermost.
    pub fn entry(&self, depth: usize) -> Option<&ScopeFrame> {
        let parent_depth = self.parent_depth();
        if depth < parent_depth {
            self.parent.as_ref().and_then(|p| p.entry(depth))
        } else {
            self.frames.get(depth - parent_depth)
        }
    }

    /// Immutable copy for handing to another thread.
    pub fn snapshot(&self) -> Arc<ExecutionStack> {
        Arc::new(self.clone())
    }

    /// Pop local frames until `depth` is reached. Returns them innermost first.
    pub fn unwind_to(&mut self, depth: usize) -> Vec<ScopeFrame> {
        let mut popped = Vec::new();
        while self.depth() > depth {
            match self.frames.pop() {
                Some(frame) => popped.push(frame),
                None => break,
            }
        }
        popped
    }

    /// Descriptions from the outermost frame to the innermost.
    pub fn descriptions(&self) -> Vec<String> {
        let mut out = self
            .parent
            .as_ref()
            .map(|p| p.descriptions())
            .unwrap_or_default();
        out.extend(self.frames.iter().map(|f| f.description.clone()));
        out
    }
}

impl fmt::Display for ExecutionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptions().join(" > "))
    }
}

impl fmt::Debug for ExecutionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.descriptions()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str) -> ScopeFrame {
        ScopeFrame::new(name, None)
    }

    #[test]
    fn push_pop_depth() {
        let mut stack = ExecutionStack::new();
        assert!(stack.is_empty());
        stack.push(frame("a"));
        stack.push(frame("b"));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().map(|f| f.description.as_str()), Some("b"));
        assert_eq!(stack.pop().map(|f| f.description), Some("b".to_string()));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn chained_stack_sees_parent_frames() {
        let mut root = ExecutionStack::new();
        root.push(frame("root"));
        root.push(frame("group"));
        let mut child = ExecutionStack::with_parent(root.snapshot());
        assert_eq!(child.depth(), 2);
        assert_eq!(child.top().map(|f| f.description.as_str()), Some("group"));

        child.push(frame("leaf"));
        assert_eq!(child.depth(), 3);
        assert_eq!(child.local_len(), 1);
        assert_eq!(child.entry(0).map(|f| f.description.as_str()), Some("root"));
        assert_eq!(child.entry(2).map(|f| f.description.as_str()), Some("leaf"));
        assert!(child.entry(3).is_none());
        assert_eq!(child.to_string(), "root > group > leaf");
    }

    #[test]
    fn pop_never_reaches_into_parent() {
        let mut root = ExecutionStack::new();
        root.push(frame("root"));
        let mut child = ExecutionStack::with_parent(root.snapshot());
        assert!(child.pop().is_none());
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn snapshot_is_independent() {
        let mut stack = ExecutionStack::new();
        stack.push(frame("a"));
        let snap = stack.snapshot();
        stack.push(frame("b"));
        assert_eq!(snap.depth(), 1);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn unwind_to_pops_innermost_first() {
        let mut stack = ExecutionStack::new();
        for name in ["a", "b", "c", "d"] {
            stack.push(frame(name));
        }
        let popped = stack.unwind_to(1);
        let names: Vec<_> = popped.iter().map(|f| f.description.as_str()).collect();
        assert_eq!(names, vec!["d", "c", "b"]);
        assert_eq!(stack.depth(), 1);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::task::{Task, TaskPayload};

type TaskFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Task>, RegistryError> + Send + Sync>;

/// Maps payload kinds to factories that rebuild tasks from their serialized body.
/// Used on execution nodes to turn a received request back into a runnable task.
#[derive(Clone)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory. Returns error if the kind is already registered.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&Value) -> Result<Arc<dyn Task>, RegistryError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        self.factories.insert(kind, Arc::new(factory));
        Ok(())
    }

    /// Register a task type that deserializes directly from the payload body.
    pub fn register_serde<T>(&mut self, kind: impl Into<String>) -> Result<(), RegistryError>
    where
        T: Task + DeserializeOwned + 'static,
    {
        let kind = kind.into();
        let label = kind.clone();
        self.register(kind, move |body| {
            serde_json::from_value::<T>(body.clone())
                .map(|task| Arc::new(task) as Arc<dyn Task>)
                .map_err(|e| RegistryError::Decode {
                    kind: label.clone(),
                    message: e.to_string(),
                })
        })
    }

    /// Rebuild the task described by `payload`.
    pub fn build(&self, payload: &TaskPayload) -> Result<Arc<dyn Task>, RegistryError> {
        let factory = self
            .factories
            .get(&payload.kind)
            .ok_or_else(|| RegistryError::UnknownKind(payload.kind.clone()))?;
        factory(&payload.body)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Task kind '{0}' is already registered")]
    DuplicateKind(String),
    #[error("Unknown task kind '{0}'")]
    UnknownKind(String),
    #[error("Failed to decode task of kind '{kind}': {message}")]
    Decode { kind: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::sequential::SequentialContext;
    use crate::task::TaskOutcome;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Square {
        x: i64,
    }

    impl Task for Square {
        fn name(&self) -> &str {
            "square"
        }

        fn run(&self, _context: &mut dyn ExecutionContext) -> TaskOutcome {
            Ok(json!(self.x * self.x))
        }

        fn payload(&self) -> Option<TaskPayload> {
            TaskPayload::new("square", self).ok()
        }
    }

    #[test]
    fn build_from_payload_and_run() {
        let mut registry = TaskRegistry::new();
        registry.register_serde::<Square>("square").unwrap();

        let payload = Square { x: 7 }.payload().unwrap();
        let task = registry.build(&payload).unwrap();
        let mut ctx = SequentialContext::new();
        assert_eq!(ctx.run(task, true), Ok(json!(49)));
    }

    #[test]
    fn duplicate_registration() {
        let mut registry = TaskRegistry::new();
        registry.register_serde::<Square>("square").unwrap();
        assert_eq!(
            registry.register_serde::<Square>("square"),
            Err(RegistryError::DuplicateKind("square".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_kind_and_bad_body() {
        let mut registry = TaskRegistry::new();
        registry.register_serde::<Square>("square").unwrap();

        let unknown = TaskPayload { kind: "cube".into(), body: json!({"x": 1}) };
        assert!(matches!(registry.build(&unknown), Err(RegistryError::UnknownKind(_))));

        let malformed = TaskPayload { kind: "square".into(), body: json!({"y": 1}) };
        assert!(matches!(registry.build(&malformed), Err(RegistryError::Decode { .. })));
    }

    #[test]
    fn kinds_are_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register_serde::<Square>("b").unwrap();
        registry.register_serde::<Square>("a").unwrap();
        assert_eq!(registry.kinds(), vec!["a", "b"]);
        assert!(registry.contains("a"));
    }
}

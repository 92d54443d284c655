//! Hierarchical task execution: tasks, scope stacks, observers, and the
//! sequential and worker-pool execution strategies.

pub mod callback;
pub mod context;
pub mod logging;
pub mod metrics;
pub mod notification;
pub mod pool;
pub mod registry;
pub mod sequential;
pub mod stack;
pub mod task;
pub mod trace;

pub use callback::{CallbackList, ExecutionCallback, MessageLevel};
pub use context::{run_group_inline, run_inline, ExecutionContext, WorkUnitCallback};
pub use logging::TracingCallback;
pub use metrics::{ExecutionMetrics, MetricsCallback};
pub use pool::{PoolError, WorkerPoolContext, WorkerThreadContext};
pub use registry::{RegistryError, TaskRegistry};
pub use sequential::SequentialContext;
pub use stack::{ExecutionStack, ScopeFrame};
pub use task::{FnTask, ProgressState, Task, TaskError, TaskGroup, TaskOutcome, TaskPayload};
pub use trace::{run_traced, ExecutionTrace, TraceCallback, TraceNode, TraceScope, TracedTask};

//! The same task tree must produce the same outcomes under every strategy.

use std::sync::Arc;

use serde_json::{json, Value};
use taskgrid_execution::{
    ExecutionContext, FnTask, MetricsCallback, SequentialContext, Task, TaskError, TaskGroup, TracingCallback,
    WorkerPoolContext,
};

fn fold_task(depth: u32) -> Arc<dyn Task> {
    FnTask::shared(format!("fold-{}", depth), move |ctx| {
        if depth == 0 {
            return Ok(json!(1));
        }
        let group = TaskGroup::with_tasks("children", vec![fold_task(depth - 1), fold_task(depth - 1)]);
        let outcomes = ctx.run_group(&group, true);
        let mut total = 0;
        for outcome in outcomes {
            total += outcome?.as_u64().ok_or_else(|| TaskError::failed("non-numeric child"))?;
        }
        Ok(json!(total))
    })
}

fn run_tree(ctx: &mut dyn ExecutionContext) -> (Value, u64) {
    let metrics = Arc::new(MetricsCallback::new());
    ctx.append_callback(metrics.clone());
    ctx.append_callback(Arc::new(TracingCallback));
    let value = ctx.run(fold_task(4), true).unwrap();
    ctx.wait_until_all_work_units_are_done();
    (value, metrics.snapshot().total_executed())
}

#[test]
fn sequential_and_pool_agree() {
    let mut sequential = SequentialContext::new();
    let mut pool = WorkerPoolContext::new(4).unwrap();

    let (seq_value, seq_scopes) = run_tree(&mut sequential);
    let (pool_value, pool_scopes) = run_tree(&mut pool);

    assert_eq!(seq_value, json!(16));
    assert_eq!(pool_value, seq_value);
    // 31 task scopes plus 15 group scopes.
    assert_eq!(seq_scopes, 46);
    assert_eq!(pool_scopes, seq_scopes);
}

#[test]
fn failure_propagates_through_groups() {
    let failing = FnTask::shared("root", |ctx| {
        let group = TaskGroup::with_tasks(
            "members",
            vec![
                FnTask::shared("fine", |_| Ok(json!(1))),
                FnTask::shared("broken", |_| Err(TaskError::failed("disk full"))),
            ],
        );
        TaskGroup::aggregate(&ctx.run_group(&group, true))
    });

    let mut pool = WorkerPoolContext::new(2).unwrap();
    match pool.run(failing, true) {
        Err(TaskError::Group { failed, total, first }) => {
            assert_eq!((failed, total), (1, 2));
            assert!(first.contains("disk full"));
        }
        other => panic!("expected group failure, got {:?}", other),
    }
}

//! End-to-end runs of the distributed context against an in-process manager
//! and executing node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use taskgrid_execution::{
    ExecutionContext, FnTask, MetricsCallback, Task, TaskError, TaskGroup, TaskOutcome, TaskPayload, TaskRegistry,
    WorkerPoolContext,
};
use taskgrid_manager::{
    DistributedContext, FixedResourceEstimator, LocalManagerClient, RequestManager, StatusBoard, WorkerNode,
};
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(5);

#[derive(Serialize, Deserialize)]
struct Square {
    value: i64,
}

impl Task for Square {
    fn name(&self) -> &str {
        "square"
    }

    fn run(&self, _context: &mut dyn ExecutionContext) -> TaskOutcome {
        if self.value == 13 {
            return Err(TaskError::failed("unlucky"));
        }
        Ok(json!(self.value * self.value))
    }

    fn payload(&self) -> Option<TaskPayload> {
        TaskPayload::new("square", self).ok()
    }
}

fn square(value: i64) -> Arc<dyn Task> {
    Arc::new(Square { value })
}

/// Manager plus one executing node driven by a background thread.
struct Cluster {
    _dir: TempDir,
    manager: Arc<RequestManager>,
    stop: Arc<AtomicBool>,
    pump: Option<thread::JoinHandle<()>>,
}

impl Cluster {
    fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(RequestManager::open(dir.path()).unwrap());

        let mut registry = TaskRegistry::new();
        registry.register_serde::<Square>("square").unwrap();
        let node = Arc::new(WorkerNode::new(
            "cluster",
            Arc::new(LocalManagerClient::new(manager.clone())),
            Arc::new(registry),
            WorkerPoolContext::new(2).unwrap(),
        ));
        manager.connect_node("cluster", node.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let pump = {
            let manager = manager.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    node.poll_requests().unwrap();
                    manager.sync_statuses();
                    thread::sleep(POLL);
                }
            })
        };

        Self {
            _dir: dir,
            manager,
            stop,
            pump: Some(pump),
        }
    }

    fn context(&self) -> DistributedContext {
        DistributedContext::new(
            Arc::new(LocalManagerClient::new(self.manager.clone())),
            "experiments",
            "laptop",
            vec!["cluster".to_string()],
        )
        .with_poll_interval(POLL)
        .with_timeout(Duration::from_secs(20))
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

#[test]
fn run_returns_the_remote_outcome() {
    let cluster = Cluster::start();
    let mut ctx = cluster.context();

    assert_eq!(ctx.run(square(7), true).unwrap(), json!(49));
    match ctx.run(square(13), true) {
        Err(TaskError::Failed(message)) => assert_eq!(message, "unlucky"),
        other => panic!("expected remote failure, got {:?}", other),
    }
    assert_eq!(ctx.num_in_flight(), 0);
    assert!(cluster.manager.active_ids().is_empty());
}

#[test]
fn group_members_run_remotely_in_order() {
    let cluster = Cluster::start();
    let metrics = Arc::new(MetricsCallback::new());
    let mut ctx = cluster.context().with_estimator(FixedResourceEstimator::new(2, 512, 1));
    ctx.append_callback(metrics.clone());

    let group = TaskGroup::with_tasks("squares", (1..=5).map(square).collect());
    let outcomes = ctx.run_group(&group, true);
    let values: Vec<_> = outcomes.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![json!(1), json!(4), json!(9), json!(16), json!(25)]);

    // Five member scopes plus the group scope.
    assert_eq!(metrics.snapshot().total_executed(), 6);
    assert!(ctx.stack().is_empty());
}

#[test]
fn work_units_complete_through_callbacks() {
    let cluster = Cluster::start();
    let mut ctx = cluster.context();
    let board = Arc::new(std::sync::Mutex::new(Vec::new()));

    for value in [2, 3] {
        let board = board.clone();
        ctx.push_work_unit(
            square(value),
            false,
            Box::new(move |outcome| board.lock().unwrap().push(outcome.unwrap())),
        );
    }
    assert_eq!(ctx.num_in_flight(), 2);
    ctx.wait_until_all_work_units_are_done();

    let mut values = board.lock().unwrap().clone();
    values.sort_by_key(|v| v.as_i64());
    assert_eq!(values, vec![json!(4), json!(9)]);
}

#[test]
fn local_only_tasks_are_rejected() {
    let cluster = Cluster::start();
    let mut ctx = cluster.context();
    let local = FnTask::shared("closure", |_| Ok(json!(1)));
    assert!(matches!(ctx.run(local, true), Err(TaskError::NotDistributable(_))));
    assert!(ctx.stack().is_empty());
}

#[test]
fn missing_destination_is_not_sent() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(RequestManager::open(dir.path()).unwrap());
    let mut ctx = DistributedContext::new(Arc::new(LocalManagerClient::new(manager)), "p", "laptop", vec![]);
    assert!(matches!(ctx.run(square(2), false), Err(TaskError::NotSent(_))));
}

#[test]
fn unattended_requests_time_out() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(RequestManager::open(dir.path()).unwrap());
    let route = Arc::new(StatusBoard::new("laptop"));
    let client = LocalManagerClient::new(manager.clone()).with_route(route.clone());
    let mut ctx = DistributedContext::new(Arc::new(client), "p", "laptop", vec!["nobody".to_string()])
        .with_poll_interval(POLL)
        .with_timeout(Duration::from_millis(50));

    match ctx.run(square(2), true) {
        Err(TaskError::Crashed(reason)) => assert!(reason.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    // Nobody claimed it: the request is still waiting on the manager.
    assert_eq!(manager.waiting_ids().len(), 1);
}

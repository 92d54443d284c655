#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use taskgrid_execution::{ExecutionTrace, TaskError, TaskOutcome, TaskPayload, TraceScope};
    use tempfile::TempDir;

    use crate::channel::{NodeChannel, RequestRoute, StatusBoard};
    use crate::error::{ChannelError, ManagerError};
    use crate::manager::{RequestManager, SyncReport};
    use crate::request::{DistributedRequest, RequestId, RequestStatus, StatusReply};

    /// Node answering status polls from a script.
    struct ScriptedNode {
        name: String,
        replies: Mutex<HashMap<RequestId, Result<StatusReply, ChannelError>>>,
        outcome: TaskOutcome,
        trace: Mutex<Option<Result<ExecutionTrace, ChannelError>>>,
        polls: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl ScriptedNode {
        fn new(name: &str, outcome: TaskOutcome) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                replies: Mutex::new(HashMap::new()),
                outcome,
                trace: Mutex::new(None),
                polls: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            })
        }

        fn answer(&self, id: RequestId, reply: Result<StatusReply, ChannelError>) {
            self.replies.lock().unwrap().insert(id, reply);
        }

        fn keep_trace(&self, trace: Result<ExecutionTrace, ChannelError>) {
            *self.trace.lock().unwrap() = Some(trace);
        }
    }

    impl NodeChannel for ScriptedNode {
        fn node_name(&self) -> &str {
            &self.name
        }

        fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError> {
            self.polls.fetch_add(1, Ordering::Relaxed);
            self.replies
                .lock()
                .unwrap()
                .get(&request.unique_id)
                .cloned()
                .unwrap_or(Ok(StatusReply::UnknownRequest))
        }

        fn fetch_result(&self, _request: &DistributedRequest) -> Result<TaskOutcome, ChannelError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Ok(self.outcome.clone())
        }

        fn fetch_trace(&self, _request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
            self.trace.lock().unwrap().clone().transpose()
        }
    }

    fn request(destination: &str) -> DistributedRequest {
        DistributedRequest::new(
            "proj",
            "submitter",
            destination,
            TaskPayload { kind: "noop".into(), body: json!({}) },
        )
    }

    fn open(dir: &TempDir) -> RequestManager {
        RequestManager::open(dir.path()).unwrap()
    }

    #[test]
    fn submit_persists_and_queues() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);

        let id = manager.submit(request("cluster"), None).unwrap();
        assert_eq!(id, 1);
        assert_eq!(manager.waiting_ids(), vec![1]);
        assert!(manager.store().request_path("proj", id).is_file());
        assert!(manager.store().has_marker("proj", id));
        assert_eq!(manager.active_request(id).unwrap().status, RequestStatus::Waiting);
        assert_eq!(manager.request_status(&manager.active_request(id).unwrap()), StatusReply::Waiting);
    }

    #[test]
    fn claiming_is_per_destination_and_removes_markers() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let a = manager.submit(request("alpha"), None).unwrap();
        let b = manager.submit(request("beta"), None).unwrap();
        let c = manager.submit(request("alpha"), None).unwrap();

        let claimed: Vec<RequestId> = manager
            .get_waiting_requests("alpha")
            .iter()
            .map(|r| r.unique_id)
            .collect();
        assert_eq!(claimed, vec![a, c]);
        assert!(!manager.store().has_marker("proj", a));
        assert!(manager.store().has_marker("proj", b));
        assert_eq!(manager.waiting_ids(), vec![b]);
        assert!(manager.get_waiting_requests("alpha").is_empty());
        // Claimed requests stay active until they settle.
        assert_eq!(manager.num_active(), 3);
    }

    #[test]
    fn duplicate_add_replaces_without_requeue() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let id = manager.submit(request("alpha"), None).unwrap();

        let mut again = manager.active_request(id).unwrap();
        again.required_cpus = 8;
        manager.add_request(again, None).unwrap();

        assert_eq!(manager.waiting_ids(), vec![id]);
        assert_eq!(manager.active_request(id).unwrap().required_cpus, 8);
    }

    #[test]
    fn re_adding_a_claimed_request_keeps_it_claimed() {
        let dir = TempDir::new().unwrap();
        let id = {
            let manager = open(&dir);
            let id = manager.submit(request("dst"), None).unwrap();
            let claimed = manager.get_waiting_requests("dst");
            assert_eq!(claimed.len(), 1);

            manager.add_request(claimed[0].clone(), None).unwrap();
            assert!(manager.waiting_ids().is_empty());
            assert!(!manager.store().has_marker("proj", id));
            id
        };

        let restarted = open(&dir);
        assert!(restarted.waiting_ids().is_empty());
        assert_eq!(restarted.active_ids(), vec![id]);
    }

    #[test]
    fn archive_removes_everything_once() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let board: Arc<dyn RequestRoute> = Arc::new(StatusBoard::new("submitter"));
        let id = manager.submit(request("alpha"), Some(&board)).unwrap();
        let submitted = manager.active_request(id).unwrap();

        let path = manager.archive_request(id, Ok(json!("done"))).unwrap();
        assert!(path.is_file());
        assert!(!manager.store().request_path("proj", id).exists());
        assert!(!manager.store().has_marker("proj", id));
        assert!(manager.active_request(id).is_none());
        assert!(!manager.is_routed(id));
        assert!(manager.get_waiting_requests("alpha").is_empty());

        assert!(matches!(
            manager.archive_request(id, Ok(json!("again"))),
            Err(ManagerError::Inactive(_))
        ));
        assert_eq!(manager.request_status(&submitted), StatusReply::Finished);
        assert_eq!(manager.fetch_result(&submitted).unwrap(), Some(Ok(json!("done"))));
    }

    #[test]
    fn crashed_request_keeps_routing_entry() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let route: Arc<dyn RequestRoute> = Arc::new(StatusBoard::new("submitter"));
        let id = manager.submit(request("alpha"), Some(&route)).unwrap();
        let submitted = manager.active_request(id).unwrap();

        let path = manager.crashed_request(id, "segfault").unwrap();
        assert!(path.ends_with(format!("Error/{}.request", id)));
        assert!(manager.active_request(id).is_none());
        assert!(manager.is_routed(id));
        assert_eq!(manager.request_status(&submitted), StatusReply::Crashed);
        assert_eq!(
            manager.fetch_result(&submitted).unwrap(),
            Some(Err(TaskError::Crashed("segfault".into())))
        );
    }

    #[test]
    fn unknown_request_status() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let mut ghost = request("alpha");
        ghost.unique_id = 42;
        assert_eq!(manager.request_status(&ghost), StatusReply::UnknownRequest);
        assert_eq!(manager.fetch_result(&ghost).unwrap(), None);
    }

    #[test]
    fn sync_archives_finished_exactly_once() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!(3)));
        manager.connect_node("alpha", node.clone());

        let id = manager.submit(request("alpha"), None).unwrap();
        manager.get_waiting_requests("alpha");
        node.answer(id, Ok(StatusReply::Finished));

        let first = manager.sync_statuses();
        assert_eq!(first.archived, 1);
        let second = manager.sync_statuses();
        assert_eq!(second, SyncReport::default());
        assert_eq!(node.fetches.load(Ordering::Relaxed), 1);
        assert_eq!(manager.num_active(), 0);
    }

    #[test]
    fn sync_archives_the_destination_trace() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!("fitted")));
        manager.connect_node("alpha", node.clone());
        let trace = ExecutionTrace {
            root: TraceScope::new("alpha"),
        };
        node.keep_trace(Ok(trace.clone()));

        let traced = manager.submit(request("alpha"), None).unwrap();
        manager.get_waiting_requests("alpha");
        node.answer(traced, Ok(StatusReply::Finished));
        let traced = manager.active_request(traced).unwrap();
        assert_eq!(manager.sync_statuses().archived, 1);
        assert_eq!(manager.fetch_trace(&traced).unwrap(), Some(trace));

        // A trace that cannot be fetched does not hold the archive back.
        node.keep_trace(Err(ChannelError::Unreachable("alpha".into())));
        let untraced = manager.submit(request("alpha"), None).unwrap();
        manager.get_waiting_requests("alpha");
        node.answer(untraced, Ok(StatusReply::Finished));
        let untraced = manager.active_request(untraced).unwrap();
        assert_eq!(manager.sync_statuses().archived, 1);
        assert_eq!(manager.fetch_result(&untraced).unwrap(), Some(Ok(json!("fitted"))));
        assert_eq!(manager.fetch_trace(&untraced).unwrap(), None);
    }

    #[test]
    fn sync_skips_requests_still_waiting() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!(null)));
        manager.connect_node("alpha", node.clone());
        manager.submit(request("alpha"), None).unwrap();

        assert_eq!(manager.sync_statuses().polled, 0);
        assert_eq!(node.polls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sync_resends_unknown_requests() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!(null)));
        manager.connect_node("alpha", node.clone());
        let id = manager.submit(request("alpha"), None).unwrap();
        manager.get_waiting_requests("alpha");
        assert!(manager.waiting_ids().is_empty());

        let report = manager.sync_statuses();
        assert_eq!(report.resent, 1);
        assert_eq!(manager.waiting_ids(), vec![id]);
        assert!(manager.store().has_marker("proj", id));
    }

    #[test]
    fn sync_updates_status_and_forwards_to_route() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!(null)));
        manager.connect_node("alpha", node.clone());
        let board = Arc::new(StatusBoard::new("submitter"));
        let route: Arc<dyn RequestRoute> = board.clone();
        let id = manager.submit(request("alpha"), Some(&route)).unwrap();
        manager.get_waiting_requests("alpha");
        node.answer(id, Ok(StatusReply::Running));

        assert_eq!(manager.sync_statuses().updated, 1);
        assert_eq!(manager.sync_statuses().updated, 0);
        assert_eq!(board.status(id), Some(RequestStatus::Running));
        assert_eq!(
            manager.store().load_request("proj", id).unwrap().unwrap().status,
            RequestStatus::Running
        );
    }

    #[test]
    fn sync_records_crashes_with_reason() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Err(TaskError::Crashed("out of memory".into())));
        manager.connect_node("alpha", node.clone());
        let id = manager.submit(request("alpha"), None).unwrap();
        let submitted = manager.active_request(id).unwrap();
        manager.get_waiting_requests("alpha");
        node.answer(id, Ok(StatusReply::Crashed));

        assert_eq!(manager.sync_statuses().crashed, 1);
        let record = manager.store().load_error(&submitted).unwrap().unwrap();
        assert_eq!(record.reason, "out of memory");
    }

    #[test]
    fn unreachable_node_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!(null)));
        manager.connect_node("alpha", node.clone());
        let id = manager.submit(request("alpha"), None).unwrap();
        manager.get_waiting_requests("alpha");
        node.answer(id, Err(ChannelError::Unreachable("alpha".into())));

        let report = manager.sync_statuses();
        assert_eq!(report.polled, 1);
        assert!(report.is_empty());
        assert!(manager.active_request(id).is_some());
    }

    #[test]
    fn expired_requests_crash_without_polling() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let node = ScriptedNode::new("alpha", Ok(json!(null)));
        manager.connect_node("alpha", node.clone());

        let mut old = request("alpha");
        old.created_at = Utc::now() - ChronoDuration::hours(3);
        let id = manager.submit(old, None).unwrap();
        let submitted = manager.active_request(id).unwrap();
        manager.get_waiting_requests("alpha");

        assert_eq!(manager.sync_statuses().crashed, 1);
        assert_eq!(node.polls.load(Ordering::Relaxed), 0);
        assert_eq!(
            manager.store().load_error(&submitted).unwrap().unwrap().reason,
            "time budget exceeded"
        );
    }

    #[test]
    fn restart_restores_waiting_requests_once() {
        let dir = TempDir::new().unwrap();
        let (claimed, unclaimed) = {
            let manager = open(&dir);
            let a = manager.submit(request("alpha"), None).unwrap();
            let b = manager.submit(request("beta"), None).unwrap();
            let c = manager.submit(request("beta"), None).unwrap();
            manager.get_waiting_requests("alpha");
            (a, vec![b, c])
        };

        let restarted = open(&dir);
        assert_eq!(restarted.waiting_ids(), unclaimed);
        assert_eq!(restarted.active_ids(), vec![claimed, unclaimed[0], unclaimed[1]]);
        // Ids keep growing past everything recovered.
        assert_eq!(restarted.submit(request("alpha"), None).unwrap(), 4);
    }

    #[test]
    fn dropped_route_is_ignored() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        let id = {
            let route: Arc<dyn RequestRoute> = Arc::new(StatusBoard::new("short-lived"));
            manager.submit(request("alpha"), Some(&route)).unwrap()
        };
        assert!(manager.is_routed(id));
        manager.update_status(id, RequestStatus::Running).unwrap();
        manager.archive_request(id, Ok(json!(1))).unwrap();
    }
}

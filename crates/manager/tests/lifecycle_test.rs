//! Request lifecycle across manager restarts.

use std::sync::Arc;

use serde_json::json;
use taskgrid_execution::TaskPayload;
use taskgrid_manager::{DistributedRequest, RequestManager, RequestStatus, StatusBoard, StatusReply};
use taskgrid_manager::{RequestRoute, ResourceEstimate};
use tempfile::TempDir;

fn request(destination: &str) -> DistributedRequest {
    DistributedRequest::new(
        "survey",
        "laptop",
        destination,
        TaskPayload {
            kind: "scan".into(),
            body: json!({"band": 3}),
        },
    )
    .with_resources(ResourceEstimate {
        cpus: 4,
        memory_mb: 2048,
        time_hours: 0,
    })
}

#[test]
fn requests_survive_restart_until_archived() {
    let dir = TempDir::new().unwrap();

    let (claimed, waiting) = {
        let manager = RequestManager::open(dir.path()).unwrap();
        let claimed = manager.submit(request("alpha"), None).unwrap();
        let waiting = manager.submit(request("beta"), None).unwrap();
        assert_eq!(manager.get_waiting_requests("alpha").len(), 1);
        manager.update_status(claimed, RequestStatus::Running).unwrap();
        (claimed, waiting)
    };

    let manager = RequestManager::open(dir.path()).unwrap();
    assert_eq!(manager.num_active(), 2);
    assert_eq!(manager.waiting_ids(), vec![waiting]);
    let recovered = manager.active_request(claimed).unwrap();
    assert_eq!(recovered.status, RequestStatus::Running);
    assert_eq!(recovered.required_cpus, 4);

    let beta = manager.get_waiting_requests("beta");
    assert_eq!(beta.len(), 1);
    assert_eq!(beta[0].task.body, json!({"band": 3}));

    manager.archive_request(claimed, Ok(json!("ok"))).unwrap();
    assert_eq!(manager.request_status(&recovered), StatusReply::Finished);
    assert_eq!(manager.fetch_result(&recovered).unwrap(), Some(Ok(json!("ok"))));

    let next = manager.submit(request("alpha"), None).unwrap();
    assert!(next > waiting);
}

#[test]
fn status_changes_reach_the_submitter() {
    let dir = TempDir::new().unwrap();
    let manager = RequestManager::open(dir.path()).unwrap();
    let board = Arc::new(StatusBoard::new("laptop"));
    let route: Arc<dyn RequestRoute> = board.clone();

    let id = manager.submit(request("alpha"), Some(&route)).unwrap();
    manager.get_waiting_requests("alpha");
    manager.update_status(id, RequestStatus::Running).unwrap();
    assert_eq!(board.status(id), Some(RequestStatus::Running));

    manager.crashed_request(id, "node lost").unwrap();
    assert_eq!(board.status(id), Some(RequestStatus::Crashed));
    assert!(manager.active_request(id).is_none());
}

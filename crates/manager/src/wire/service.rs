use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use taskgrid_execution::{ExecutionTrace, TaskOutcome};
use tracing::{debug, info, warn};

use super::protocol::{ManagerReply, ManagerRequest};
use crate::channel::NodeChannel;
use crate::error::ChannelError;
use crate::manager::RequestManager;
use crate::request::{DistributedRequest, RequestId, StatusReply};

/// Answers decoded manager requests.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: ManagerRequest) -> ManagerReply;
}

#[derive(Debug, Clone)]
struct Reported {
    status: StatusReply,
    outcome: Option<TaskOutcome>,
    trace: Option<ExecutionTrace>,
}

/// Last status a remote node reported for each of its requests.
///
/// Stands in for the node during reconciliation: the node pushes
/// `ReportStatus` and the manager polls the mailbox.
pub struct MailboxChannel {
    name: String,
    entries: Mutex<HashMap<RequestId, Reported>>,
}

impl MailboxChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, Reported>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(
        &self,
        id: RequestId,
        status: StatusReply,
        outcome: Option<TaskOutcome>,
        trace: Option<ExecutionTrace>,
    ) {
        self.entries().insert(id, Reported { status, outcome, trace });
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeChannel for MailboxChannel {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError> {
        Ok(self
            .entries()
            .get(&request.unique_id)
            .map(|reported| reported.status)
            .unwrap_or(StatusReply::UnknownRequest))
    }

    fn fetch_result(&self, request: &DistributedRequest) -> Result<TaskOutcome, ChannelError> {
        let id = request.unique_id;
        match self.entries().get(&id).map(|reported| &reported.outcome) {
            Some(Some(outcome)) => Ok(outcome.clone()),
            Some(None) => Err(ChannelError::NotReady(id)),
            None => Err(ChannelError::UnknownRequest(id)),
        }
    }

    fn fetch_trace(&self, request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
        let id = request.unique_id;
        match self.entries().get(&id) {
            Some(reported) => Ok(reported.trace.clone()),
            None => Err(ChannelError::UnknownRequest(id)),
        }
    }
}

/// Serves the manager protocol on top of a [`RequestManager`].
///
/// Clones share the manager and the node mailboxes.
#[derive(Clone)]
pub struct ManagerService {
    manager: Arc<RequestManager>,
    mailboxes: Arc<Mutex<HashMap<String, Arc<MailboxChannel>>>>,
}

impl ManagerService {
    pub fn new(manager: Arc<RequestManager>) -> Self {
        Self {
            manager,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn manager(&self) -> &Arc<RequestManager> {
        &self.manager
    }

    /// Mailbox of `node`, connecting a fresh one when the node is new or
    /// `reset` is set.
    pub fn mailbox(&self, node: &str, reset: bool) -> Arc<MailboxChannel> {
        let mut mailboxes = self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner);
        if !reset {
            if let Some(mailbox) = mailboxes.get(node) {
                return Arc::clone(mailbox);
            }
        }
        let mailbox = Arc::new(MailboxChannel::new(node));
        mailboxes.insert(node.to_string(), Arc::clone(&mailbox));
        self.manager.connect_node(node, mailbox.clone());
        mailbox
    }

    /// Blocking dispatch of one request.
    pub fn dispatch(&self, request: ManagerRequest) -> ManagerReply {
        match request {
            ManagerRequest::Submit { request } => match self.manager.submit(request, None) {
                Ok(id) => ManagerReply::Submitted { id },
                Err(e) => ManagerReply::Error(e.to_string()),
            },
            ManagerRequest::WaitingRequests { destination } => {
                let mailbox = self.mailbox(&destination, false);
                let claimed = self.manager.get_waiting_requests(&destination);
                for request in &claimed {
                    mailbox.record(request.unique_id, StatusReply::Running, None, None);
                }
                ManagerReply::Requests(claimed)
            }
            ManagerRequest::Status { request } => ManagerReply::Status(self.manager.request_status(&request)),
            ManagerRequest::FetchResult { request } => match self.manager.fetch_result(&request) {
                Ok(outcome) => ManagerReply::Result(outcome),
                Err(e) => ManagerReply::Error(e.to_string()),
            },
            ManagerRequest::FetchTrace { request } => match self.manager.fetch_trace(&request) {
                Ok(trace) => ManagerReply::Trace(trace),
                Err(e) => ManagerReply::Error(e.to_string()),
            },
            ManagerRequest::RegisterNode { name } => {
                self.mailbox(&name, true);
                info!(node = %name, "node registered, previous work forgotten");
                ManagerReply::Ack
            }
            ManagerRequest::ReportStatus {
                node,
                request_id,
                status,
                outcome,
                trace,
            } => {
                debug!(node = %node, request_id, ?status, traced = trace.is_some(), "status reported");
                self.mailbox(&node, false).record(request_id, status, outcome, trace);
                ManagerReply::Ack
            }
        }
    }
}

#[async_trait]
impl ServiceHandler for ManagerService {
    /// Dispatch runs on the blocking pool; it touches the request store.
    async fn handle(&self, request: ManagerRequest) -> ManagerReply {
        let topic = request.topic();
        let service = self.clone();
        let reply = match tokio::task::spawn_blocking(move || service.dispatch(request)).await {
            Ok(reply) => reply,
            Err(e) => ManagerReply::Error(format!("dispatch aborted: {e}")),
        };
        if let ManagerReply::Error(message) = &reply {
            warn!(topic, error = %message, "request failed");
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgrid_execution::{TaskPayload, TraceScope};
    use tempfile::TempDir;

    fn request(destination: &str) -> DistributedRequest {
        DistributedRequest::new(
            "proj",
            "laptop",
            destination,
            TaskPayload {
                kind: "noop".into(),
                body: json!(null),
            },
        )
    }

    fn submitted(service: &ManagerService, destination: &str) -> DistributedRequest {
        let id = match service.dispatch(ManagerRequest::Submit {
            request: request(destination),
        }) {
            ManagerReply::Submitted { id } => id,
            other => panic!("unexpected reply {:?}", other),
        };
        service.manager().active_request(id).unwrap()
    }

    #[test]
    fn reported_results_are_archived_on_sync() {
        let dir = TempDir::new().unwrap();
        let service = ManagerService::new(Arc::new(RequestManager::open(dir.path()).unwrap()));
        let req = submitted(&service, "cluster");

        match service.dispatch(ManagerRequest::WaitingRequests {
            destination: "cluster".into(),
        }) {
            ManagerReply::Requests(claimed) => assert_eq!(claimed.len(), 1),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(service.manager().sync_statuses().updated, 1);

        service.dispatch(ManagerRequest::ReportStatus {
            node: "cluster".into(),
            request_id: req.unique_id,
            status: StatusReply::Finished,
            outcome: Some(Ok(json!("done"))),
            trace: None,
        });
        assert_eq!(service.manager().sync_statuses().archived, 1);
        assert_eq!(
            service.dispatch(ManagerRequest::FetchResult { request: req.clone() }),
            ManagerReply::Result(Some(Ok(json!("done"))))
        );
        assert_eq!(
            service.dispatch(ManagerRequest::FetchTrace { request: req }),
            ManagerReply::Trace(None)
        );
    }

    #[test]
    fn reported_trace_is_archived_with_the_result() {
        let dir = TempDir::new().unwrap();
        let service = ManagerService::new(Arc::new(RequestManager::open(dir.path()).unwrap()));
        let req = submitted(&service, "cluster");
        service.dispatch(ManagerRequest::WaitingRequests {
            destination: "cluster".into(),
        });

        let mut root = TraceScope::new("cluster request 1");
        root.outcome = Some(Ok(json!(2)));
        let trace = ExecutionTrace { root };
        service.dispatch(ManagerRequest::ReportStatus {
            node: "cluster".into(),
            request_id: req.unique_id,
            status: StatusReply::Finished,
            outcome: Some(Ok(json!(2))),
            trace: Some(trace.clone()),
        });
        assert_eq!(service.manager().sync_statuses().archived, 1);
        assert_eq!(
            service.dispatch(ManagerRequest::FetchTrace { request: req }),
            ManagerReply::Trace(Some(trace))
        );
    }

    #[tokio::test]
    async fn handle_dispatches_off_the_async_worker() {
        let dir = TempDir::new().unwrap();
        let service = ManagerService::new(Arc::new(RequestManager::open(dir.path()).unwrap()));
        let handler: Arc<dyn ServiceHandler> = Arc::new(service.clone());

        let id = match handler.handle(ManagerRequest::Submit { request: request("cluster") }).await {
            ManagerReply::Submitted { id } => id,
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(service.manager().waiting_ids(), vec![id]);

        let unknown = request("cluster");
        assert_eq!(
            handler.handle(ManagerRequest::Status { request: unknown }).await,
            ManagerReply::Status(StatusReply::UnknownRequest)
        );
    }

    #[test]
    fn re_registration_requeues_claimed_work() {
        let dir = TempDir::new().unwrap();
        let service = ManagerService::new(Arc::new(RequestManager::open(dir.path()).unwrap()));
        let req = submitted(&service, "cluster");
        service.dispatch(ManagerRequest::WaitingRequests {
            destination: "cluster".into(),
        });

        assert_eq!(
            service.dispatch(ManagerRequest::RegisterNode { name: "cluster".into() }),
            ManagerReply::Ack
        );
        let report = service.manager().sync_statuses();
        assert_eq!(report.resent, 1);
        assert_eq!(service.manager().waiting_ids(), vec![req.unique_id]);
    }

    #[test]
    fn mailbox_answers() {
        let mailbox = MailboxChannel::new("n");
        let mut req = request("n");
        req.unique_id = 3;
        assert_eq!(mailbox.request_status(&req).unwrap(), StatusReply::UnknownRequest);
        assert_eq!(mailbox.fetch_trace(&req), Err(ChannelError::UnknownRequest(3)));
        mailbox.record(3, StatusReply::Running, None, None);
        assert_eq!(mailbox.fetch_result(&req), Err(ChannelError::NotReady(3)));
        mailbox.record(3, StatusReply::Finished, Some(Ok(json!(1))), None);
        assert_eq!(mailbox.fetch_result(&req), Ok(Ok(json!(1))));
        assert_eq!(mailbox.fetch_trace(&req), Ok(None));
    }
}

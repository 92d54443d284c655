use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use taskgrid_execution::{ExecutionTrace, TaskOutcome};

use crate::error::ChannelError;
use crate::manager::RequestManager;
use crate::request::{DistributedRequest, RequestId, RequestStatus, StatusReply};

/// How the manager reaches a destination node during reconciliation.
pub trait NodeChannel: Send + Sync {
    fn node_name(&self) -> &str;

    fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError>;

    /// Outcome of a request the node reported as finished or crashed.
    fn fetch_result(&self, request: &DistributedRequest) -> Result<TaskOutcome, ChannelError>;

    /// Trace recorded while the request ran, if the node keeps one.
    fn fetch_trace(&self, _request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
        Ok(None)
    }
}

/// Where the manager forwards status changes of a request, typically the
/// connection of the node that submitted it.
pub trait RequestRoute: Send + Sync {
    fn route_name(&self) -> &str;

    fn status_changed(&self, request: &DistributedRequest, status: RequestStatus);
}

/// Operations a submitting or executing node needs from the manager.
pub trait ManagerClient: Send + Sync {
    /// Register a request and return its minted id.
    fn submit(&self, request: DistributedRequest) -> Result<RequestId, ChannelError>;

    /// Claim every request waiting for `destination`.
    fn waiting_requests(&self, destination: &str) -> Result<Vec<DistributedRequest>, ChannelError>;

    fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError>;

    /// Archived outcome, `None` while the request is not terminal.
    fn fetch_result(&self, request: &DistributedRequest) -> Result<Option<TaskOutcome>, ChannelError>;

    /// Trace archived with a finished request.
    fn fetch_trace(&self, _request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
        Ok(None)
    }

    /// Announce an executing node. A node announcing itself again has
    /// forgotten its previous work.
    fn register_node(&self, _name: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Push a status change from an executing node.
    fn report_status(
        &self,
        _node: &str,
        _request_id: RequestId,
        _status: StatusReply,
        _outcome: Option<TaskOutcome>,
        _trace: Option<ExecutionTrace>,
    ) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// In-process client calling a [`RequestManager`] directly.
pub struct LocalManagerClient {
    manager: Arc<RequestManager>,
    route: Option<Arc<dyn RequestRoute>>,
}

impl LocalManagerClient {
    pub fn new(manager: Arc<RequestManager>) -> Self {
        Self { manager, route: None }
    }

    /// Submitted requests will forward their status changes to `route`.
    pub fn with_route(mut self, route: Arc<dyn RequestRoute>) -> Self {
        self.route = Some(route);
        self
    }
}

impl ManagerClient for LocalManagerClient {
    fn submit(&self, request: DistributedRequest) -> Result<RequestId, ChannelError> {
        Ok(self.manager.submit(request, self.route.as_ref())?)
    }

    fn waiting_requests(&self, destination: &str) -> Result<Vec<DistributedRequest>, ChannelError> {
        Ok(self.manager.get_waiting_requests(destination))
    }

    fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError> {
        Ok(self.manager.request_status(request))
    }

    fn fetch_result(&self, request: &DistributedRequest) -> Result<Option<TaskOutcome>, ChannelError> {
        Ok(self.manager.fetch_result(request)?)
    }

    fn fetch_trace(&self, request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
        Ok(self.manager.fetch_trace(request)?)
    }
}

/// Route remembering the last status forwarded for each request.
pub struct StatusBoard {
    name: String,
    statuses: Mutex<HashMap<RequestId, RequestStatus>>,
}

impl StatusBoard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestRoute for StatusBoard {
    fn route_name(&self) -> &str {
        &self.name
    }

    fn status_changed(&self, request: &DistributedRequest, status: RequestStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.unique_id, status);
    }
}

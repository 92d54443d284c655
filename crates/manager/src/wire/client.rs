use std::time::Duration;

use taskgrid_core::ManagerConfig;
use taskgrid_execution::{ExecutionTrace, TaskOutcome};
use tokio::runtime::Runtime;
use tracing::debug;

use super::endpoint::Endpoint;
use super::envelope::Envelope;
use super::error::WireError;
use super::protocol::{ManagerReply, ManagerRequest};
use super::reqrep::RequestClient;
use crate::channel::ManagerClient;
use crate::error::ChannelError;
use crate::request::{DistributedRequest, RequestId, StatusReply};

/// Blocking [`ManagerClient`] speaking to a remote manager.
///
/// Owns a small tokio runtime driving the DEALER socket, so it can be used
/// from the synchronous execution contexts. Must not be called from inside
/// another tokio runtime.
pub struct RemoteManagerClient {
    client: RequestClient,
    runtime: Runtime,
    timeout: Duration,
}

impl RemoteManagerClient {
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, WireError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("taskgrid-wire")
            .enable_all()
            .build()?;
        let client = runtime.block_on(RequestClient::connect(endpoint))?;
        Ok(Self {
            client,
            runtime,
            timeout,
        })
    }

    pub fn from_config(config: &ManagerConfig) -> Result<Self, WireError> {
        Self::connect(&Endpoint::from_config(config), config.request_timeout())
    }

    pub fn call(&self, request: ManagerRequest) -> Result<ManagerReply, WireError> {
        let envelope = Envelope::request(request.topic(), &request)?;
        let reply = self
            .runtime
            .block_on(self.client.request(envelope, self.timeout))?;
        debug!(topic = %reply.topic, "reply received");
        match reply.decode::<ManagerReply>()? {
            ManagerReply::Error(message) => Err(WireError::Remote(message)),
            reply => Ok(reply),
        }
    }
}

fn unexpected(reply: ManagerReply) -> ChannelError {
    ChannelError::Transport(format!("unexpected reply {:?}", reply))
}

impl ManagerClient for RemoteManagerClient {
    fn submit(&self, request: DistributedRequest) -> Result<RequestId, ChannelError> {
        match self.call(ManagerRequest::Submit { request })? {
            ManagerReply::Submitted { id } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn waiting_requests(&self, destination: &str) -> Result<Vec<DistributedRequest>, ChannelError> {
        match self.call(ManagerRequest::WaitingRequests {
            destination: destination.to_string(),
        })? {
            ManagerReply::Requests(requests) => Ok(requests),
            other => Err(unexpected(other)),
        }
    }

    fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError> {
        match self.call(ManagerRequest::Status {
            request: request.clone(),
        })? {
            ManagerReply::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    fn fetch_result(&self, request: &DistributedRequest) -> Result<Option<TaskOutcome>, ChannelError> {
        match self.call(ManagerRequest::FetchResult {
            request: request.clone(),
        })? {
            ManagerReply::Result(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    fn fetch_trace(&self, request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
        match self.call(ManagerRequest::FetchTrace {
            request: request.clone(),
        })? {
            ManagerReply::Trace(trace) => Ok(trace),
            other => Err(unexpected(other)),
        }
    }

    fn register_node(&self, name: &str) -> Result<(), ChannelError> {
        match self.call(ManagerRequest::RegisterNode { name: name.to_string() })? {
            ManagerReply::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn report_status(
        &self,
        node: &str,
        request_id: RequestId,
        status: StatusReply,
        outcome: Option<TaskOutcome>,
        trace: Option<ExecutionTrace>,
    ) -> Result<(), ChannelError> {
        match self.call(ManagerRequest::ReportStatus {
            node: node.to_string(),
            request_id,
            status,
            outcome,
            trace,
        })? {
            ManagerReply::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

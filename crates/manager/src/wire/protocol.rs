use serde::{Deserialize, Serialize};
use taskgrid_execution::{ExecutionTrace, TaskOutcome};

use crate::request::{DistributedRequest, RequestId, StatusReply};

/// Operations served by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerRequest {
    Submit {
        request: DistributedRequest,
    },
    /// Claim every request waiting for `destination`.
    WaitingRequests {
        destination: String,
    },
    Status {
        request: DistributedRequest,
    },
    FetchResult {
        request: DistributedRequest,
    },
    FetchTrace {
        request: DistributedRequest,
    },
    /// An executing node (re)started and has no running work.
    RegisterNode {
        name: String,
    },
    ReportStatus {
        node: String,
        request_id: RequestId,
        status: StatusReply,
        outcome: Option<TaskOutcome>,
        trace: Option<ExecutionTrace>,
    },
}

impl ManagerRequest {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "manager.submit",
            Self::WaitingRequests { .. } => "manager.waiting",
            Self::Status { .. } => "manager.status",
            Self::FetchResult { .. } => "manager.result",
            Self::FetchTrace { .. } => "manager.trace",
            Self::RegisterNode { .. } => "manager.register",
            Self::ReportStatus { .. } => "manager.report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerReply {
    Submitted { id: RequestId },
    Requests(Vec<DistributedRequest>),
    Status(StatusReply),
    Result(Option<TaskOutcome>),
    Trace(Option<ExecutionTrace>),
    Ack,
    Error(String),
}

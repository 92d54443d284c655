//! Distributed request manager: durable request registry, status
//! reconciliation, executing nodes, the distributed execution context, and
//! the ZeroMQ protocol connecting them.

pub mod channel;
pub mod distributed;
pub mod error;
pub mod id;
pub mod manager;
pub mod node;
pub mod request;
pub mod store;
pub mod wire;

pub use channel::{LocalManagerClient, ManagerClient, NodeChannel, RequestRoute, StatusBoard};
pub use distributed::{DistributedContext, FixedResourceEstimator, ResourceEstimator};
pub use error::{ChannelError, ManagerError};
pub use id::RequestIdGenerator;
pub use manager::{RequestManager, SyncReport};
pub use node::WorkerNode;
pub use request::{
    ArchiveRecord, DistributedRequest, ErrorRecord, RequestId, RequestStatus, ResourceEstimate, StatusReply,
};
pub use store::RequestStore;
pub use wire::{ManagerServer, ManagerService, RemoteManagerClient, WireError};

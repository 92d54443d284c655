//! ZeroMQ transport between the manager and the nodes talking to it.
//!
//! Requests and replies travel as MessagePack [`Envelope`]s over a
//! DEALER/ROUTER pair. [`ManagerServer`] serves a [`ManagerService`] and
//! [`RemoteManagerClient`] is the blocking [`ManagerClient`](crate::channel::ManagerClient)
//! used by remote submitters and executing nodes.

pub mod client;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod reqrep;
pub mod server;
pub mod service;

pub use client::RemoteManagerClient;
pub use endpoint::Endpoint;
pub use envelope::Envelope;
pub use error::WireError;
pub use protocol::{ManagerReply, ManagerRequest};
pub use reqrep::{ReplyToken, RequestClient, RequestServer};
pub use server::ManagerServer;
pub use service::{MailboxChannel, ManagerService, ServiceHandler};

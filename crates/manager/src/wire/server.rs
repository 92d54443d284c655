use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::endpoint::Endpoint;
use super::envelope::Envelope;
use super::error::WireError;
use super::protocol::{ManagerReply, ManagerRequest};
use super::reqrep::RequestServer;
use super::service::ServiceHandler;

/// Receives manager requests on a ROUTER socket and answers them one at a
/// time through a [`ServiceHandler`].
pub struct ManagerServer {
    endpoint: Endpoint,
    socket: RequestServer,
    handler: Arc<dyn ServiceHandler>,
}

impl ManagerServer {
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn bind(endpoint: Endpoint, handler: Arc<dyn ServiceHandler>) -> Result<Self, WireError> {
        let socket = RequestServer::bind(&endpoint).await?;
        info!("manager listening");
        Ok(Self {
            endpoint,
            socket,
            handler,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serve until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WireError> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(endpoint = %self.endpoint, "manager server stopping");
                        return Ok(());
                    }
                }
                received = self.socket.recv_request() => {
                    let (token, envelope) = match received {
                        Ok(received) => received,
                        Err(WireError::Zmq(e)) => {
                            error!(error = %e, "socket failed");
                            return Err(WireError::Zmq(e));
                        }
                        Err(e) => {
                            warn!(error = %e, "dropping malformed request");
                            continue;
                        }
                    };
                    let reply = match envelope.decode::<ManagerRequest>() {
                        Ok(request) => self.handler.handle(request).await,
                        Err(e) => ManagerReply::Error(format!("undecodable request: {e}")),
                    };
                    let Some(reply) = encode_reply(&envelope, &reply) else {
                        continue;
                    };
                    if let Err(e) = self.socket.send_reply(token, reply).await {
                        warn!(error = %e, "could not send reply");
                    }
                }
            }
        }
    }
}

/// Reply envelope for `request`. A reply that cannot be encoded is answered
/// with an error instead, so the caller is not left waiting for a timeout.
fn encode_reply<T: Serialize>(request: &Envelope, reply: &T) -> Option<Envelope> {
    match request.reply_to(reply) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            warn!(topic = %request.topic, error = %e, "could not encode reply");
            match request.reply_to(&ManagerReply::Error(format!("could not encode reply: {e}"))) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    error!(topic = %request.topic, error = %e, "could not encode error reply, dropping it");
                    None
                }
            }
        }
    }
}

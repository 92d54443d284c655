//! DEALER/ROUTER request/reply.
//!
//! zeromq-rs prepends the peer identity on ROUTER recv and pops it on send:
//! - DEALER sends and receives `[topic, envelope]`
//! - ROUTER receives and sends `[identity, topic, envelope]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use super::endpoint::Endpoint;
use super::envelope::Envelope;
use super::error::WireError;

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>>;

/// Identity of the peer a request came from.
#[derive(Debug, Clone)]
pub struct ReplyToken {
    identity: Vec<u8>,
}

/// Data frames after any empty delimiters: `[topic, envelope]`.
fn decode_frames<'a>(frames: impl Iterator<Item = &'a [u8]>) -> Result<Envelope, WireError> {
    let data: Vec<&[u8]> = frames.skip_while(|f| f.is_empty()).collect();
    if data.len() < 2 {
        return Err(WireError::Transport(format!(
            "expected [topic, envelope], got {} frames",
            data.len()
        )));
    }
    Envelope::from_bytes(data[1])
}

/// DEALER side. The socket lives in a background task that multiplexes
/// outgoing requests and incoming replies.
pub struct RequestClient {
    outbox: mpsc::Sender<ZmqMessage>,
    pending: PendingMap,
    event_loop: tokio::task::JoinHandle<()>,
}

impl RequestClient {
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, WireError> {
        let mut socket = DealerSocket::new();
        info!("connecting DEALER socket");
        socket.connect(&endpoint.address()).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (outbox, inbox) = mpsc::channel(256);
        let event_loop = tokio::spawn(Self::event_loop(socket, inbox, Arc::clone(&pending)));

        Ok(Self {
            outbox,
            pending,
            event_loop,
        })
    }

    async fn event_loop(mut socket: DealerSocket, mut inbox: mpsc::Receiver<ZmqMessage>, pending: PendingMap) {
        loop {
            tokio::select! {
                Some(message) = inbox.recv() => {
                    if let Err(e) = socket.send(message).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                received = socket.recv() => match received {
                    Ok(message) => Self::dispatch(&pending, message).await,
                    Err(e) => {
                        debug!(error = %e, "DEALER recv loop ending");
                        break;
                    }
                },
            }
        }
    }

    async fn dispatch(pending: &Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>, message: ZmqMessage) {
        let reply = match decode_frames(message.iter().map(|f| f.as_ref())) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "dropping undecodable reply");
                return;
            }
        };
        match pending.lock().await.remove(&reply.correlation_id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!(correlation_id = %reply.correlation_id, "reply for unknown request"),
        }
    }

    /// Send `request` and wait for the reply carrying its correlation id.
    pub async fn request(&self, request: Envelope, timeout: Duration) -> Result<Envelope, WireError> {
        let id = request.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut message = ZmqMessage::from(request.topic.as_str());
        message.push_back(request.to_bytes()?.into());
        if self.outbox.send(message).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(WireError::Transport("client event loop closed".into()));
        }
        debug!(correlation_id = %id, topic = %request.topic, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(WireError::Transport("reply channel closed".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(WireError::Timeout(timeout))
            }
        }
    }
}

impl Drop for RequestClient {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// ROUTER side.
pub struct RequestServer {
    socket: Mutex<RouterSocket>,
}

impl RequestServer {
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, WireError> {
        endpoint.prepare_bind()?;
        let mut socket = RouterSocket::new();
        info!("binding ROUTER socket");
        socket.bind(&endpoint.address()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    pub async fn recv_request(&self) -> Result<(ReplyToken, Envelope), WireError> {
        let message = self.socket.lock().await.recv().await?;
        let frames: Vec<&[u8]> = message.iter().map(|f| f.as_ref()).collect();
        let Some((identity, rest)) = frames.split_first() else {
            return Err(WireError::Transport("empty ROUTER message".into()));
        };
        let request = decode_frames(rest.iter().copied())?;
        debug!(correlation_id = %request.correlation_id, topic = %request.topic, "request received");
        Ok((
            ReplyToken {
                identity: identity.to_vec(),
            },
            request,
        ))
    }

    pub async fn send_reply(&self, token: ReplyToken, reply: Envelope) -> Result<(), WireError> {
        let mut message = ZmqMessage::from(token.identity);
        message.push_back(reply.topic.as_bytes().to_vec().into());
        message.push_back(reply.to_bytes()?.into());
        self.socket.lock().await.send(message).await?;
        debug!(correlation_id = %reply.correlation_id, topic = %reply.topic, "reply sent");
        Ok(())
    }
}

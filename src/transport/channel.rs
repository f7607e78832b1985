//! In-memory transport
//!
//! A connector whose attempts are answered by a [`ChannelListener`]: the
//! listener side decides whether each attempt opens, is refused, or hangs,
//! then scripts frames and closes through a [`RemoteEnd`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::{Connector, Transport, TransportEvent};
use crate::connection::DisconnectReason;
use crate::error::ConnectionError;

/// Create a connected connector/listener pair
pub fn channel_transport() -> (ChannelConnector, ChannelListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelConnector { attempts: tx },
        ChannelListener { attempts: rx },
    )
}

/// Client side factory
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    attempts: mpsc::UnboundedSender<PendingAttempt>,
}

#[async_trait]
impl Connector for ChannelConnector {
    type Transport = ChannelTransport;

    async fn connect(&self, url: &Url) -> Result<Self::Transport, ConnectionError> {
        let (reply, response) = oneshot::channel();
        self.attempts
            .send(PendingAttempt {
                url: url.clone(),
                reply,
            })
            .map_err(|_| ConnectionError::Transport("listener dropped".into()))?;

        match response.await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(reason)) => Err(ConnectionError::Transport(reason)),
            Err(_) => Err(ConnectionError::Transport("attempt abandoned".into())),
        }
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Server side: receives connection attempts
#[derive(Debug)]
pub struct ChannelListener {
    attempts: mpsc::UnboundedReceiver<PendingAttempt>,
}

impl ChannelListener {
    /// Wait for the next attempt
    pub async fn next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempts.recv().await
    }

    /// Take an attempt if one is queued
    pub fn try_next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempts.try_recv().ok()
    }
}

/// One attempt waiting for a verdict; holding it without answering keeps
/// the client in `connecting`
#[derive(Debug)]
pub struct PendingAttempt {
    url: Url,
    reply: oneshot::Sender<Result<ChannelTransport, String>>,
}

impl PendingAttempt {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Look up a query parameter of the attempted URL
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Open the transport
    pub fn accept(self) -> RemoteEnd {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();

        // Client may already have given up on this attempt
        let _ = self.reply.send(Ok(ChannelTransport { inbound, outbound }));

        RemoteEnd {
            to_client,
            from_client,
        }
    }

    /// Fail the attempt
    pub fn refuse(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(reason.into()));
    }
}

/// Client side of an open in-memory connection
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.outbound
            .send(text)
            .map_err(|_| ConnectionError::Transport("remote end dropped".into()))
    }

    async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed(DisconnectReason::abnormal("remote end dropped")))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Remote side of an open in-memory connection
#[derive(Debug)]
pub struct RemoteEnd {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    /// Deliver a text frame; false once the client side is gone
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(TransportEvent::Frame(text.into())).is_ok()
    }

    /// Deliver a JSON frame
    pub fn send_json(&self, frame: &Value) -> bool {
        self.send_text(frame.to_string())
    }

    /// Close with a handshake
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.to_client
            .send(TransportEvent::Closed(DisconnectReason::clean(code, reason)))
            .is_ok()
    }

    /// Report an error followed by an abnormal close
    pub fn fail(&self, error: &str) -> bool {
        self.to_client
            .send(TransportEvent::Error(error.to_string()))
            .is_ok()
            && self
                .to_client
                .send(TransportEvent::Closed(DisconnectReason::abnormal(error)))
                .is_ok()
    }

    /// Next frame written by the client; `None` once the client dropped it
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Frame written by the client, if one is queued
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Next frame parsed as JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Whether the client has closed or dropped its side
    pub fn is_client_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}

//! Transport abstraction for pluggable stream backends

pub mod channel;
pub mod websocket;

use async_trait::async_trait;
use url::Url;

use crate::connection::DisconnectReason;
use crate::error::ConnectionError;

pub use channel::{channel_transport, ChannelConnector, ChannelListener, PendingAttempt, RemoteEnd};
pub use websocket::{WsConnector, WsTransport};

/// What a transport delivered
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One text frame
    Frame(String),
    /// Transport-level error; a close follows
    Error(String),
    /// Transport is gone
    Closed(DisconnectReason),
}

/// One open bidirectional frame stream
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one text frame
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Next event; must be cancel-safe
    async fn recv(&mut self) -> TransportEvent;

    /// Close gracefully
    async fn close(&mut self);
}

/// Factory for transport connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport type this connector produces
    type Transport: Transport;

    /// Attempt to connect, returning an open transport on success
    async fn connect(&self, url: &Url) -> Result<Self::Transport, ConnectionError>;

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}

//! Caller callbacks

use serde_json::Value;
use tokio::sync::mpsc;

use super::state::DisconnectReason;
use crate::error::ConnectionError;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Transport opened
    Connected,
    /// Transport went away
    Disconnected(DisconnectReason),
    /// Application frame, in arrival order
    Message(Value),
    /// Transient or fatal error
    Error(ConnectionError),
}

/// Callback hooks invoked from the manager task
///
/// Calls are serialized: the manager never invokes two hooks concurrently,
/// and `on_message` sees frames in the order the transport delivered them.
pub trait ConnectionHandler: Send + 'static {
    fn on_message(&mut self, _frame: Value) {}

    fn on_connect(&mut self) {}

    fn on_disconnect(&mut self, _reason: &DisconnectReason) {}

    fn on_error(&mut self, _error: &ConnectionError) {}

    /// Route one event to the matching hook
    fn dispatch(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.on_connect(),
            ConnectionEvent::Disconnected(reason) => self.on_disconnect(&reason),
            ConnectionEvent::Message(frame) => self.on_message(frame),
            ConnectionEvent::Error(error) => self.on_error(&error),
        }
    }
}

/// Forwards every event into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ConnectionHandler for ChannelHandler {
    fn dispatch(&mut self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

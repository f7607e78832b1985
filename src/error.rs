//! Error types surfaced by the connection manager

use thiserror::Error;

/// Errors reported through `on_error` and the status snapshot
///
/// Public manager methods never return these; they only show up in
/// callbacks, in [`ConnectionStatus::error`](crate::connection::ConnectionStatus),
/// and from constructors that validate their input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The endpoint URL could not be parsed or uses an unsupported scheme
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Transient transport failure; the close that follows drives the state
    #[error("transport error: {0}")]
    Transport(String),

    /// Automatic reconnection gave up
    #[error("maximum reconnect attempts reached (reconnectAttempts {attempts} >= {max})")]
    RetriesExhausted { attempts: u32, max: u32 },

    /// Inbound frame that is not a JSON object with a string `type`
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Outbound frame could not be serialized
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl ConnectionError {
    /// Whether automatic reconnection has stopped because of this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::RetriesExhausted { .. })
    }
}

//! Execstream - resilient client for execution-event streams
//!
//! This library keeps one logical WebSocket subscription alive: exponential
//! backoff with an attempt ceiling, heartbeat-based stale detection, a
//! connection watchdog and visibility-aware recovery, while filtering
//! protocol frames out of what the caller sees.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod transport;
pub mod util;
pub mod visibility;

pub use config::Config;
pub use connection::{
    ConnectionEvent, ConnectionHandler, ConnectionManager, ConnectionPhase, ConnectionStatus,
    DisconnectReason, ManagerConfig,
};
pub use error::ConnectionError;
pub use protocol::Endpoint;

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

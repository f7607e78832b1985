//! Connection management
//!
//! A [`ConnectionMachine`] decides, a [`ConnectionManager`] task executes.
//! Everything a caller observes (phase, last error, attempt counter) lives
//! in [`ConnectionStatus`].

mod backoff;
mod handler;
mod heartbeat;
mod machine;
mod manager;
mod state;

pub use backoff::{ReconnectPolicy, DEFAULT_BASE_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use handler::{ChannelHandler, ConnectionEvent, ConnectionHandler};
pub use heartbeat::{
    Heartbeat, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_STALE_FACTOR, MIN_HEARTBEAT_INTERVAL,
};
pub use machine::{
    Action, ConnectionMachine, ManagerConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SETTLE_DELAY,
};
pub use manager::ConnectionManager;
pub use state::{
    ConnectionPhase, ConnectionStatus, DisconnectReason, StatusInfo, CLOSE_ABNORMAL, CLOSE_NORMAL,
};

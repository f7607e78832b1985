//! Connection state

use serde::Serialize;
use std::time::Duration;

use crate::error::ConnectionError;

/// Close code for a caller-initiated disconnect
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for a connection lost without a closing handshake
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No live transport
    #[default]
    Disconnected,
    /// Transport requested, not open yet
    Connecting,
    /// Transport open
    Connected,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Connected => write!(f, "connected"),
        }
    }
}

/// Why a transport went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Close code (WebSocket numbering)
    pub code: u16,
    /// Whether a closing handshake completed
    pub clean: bool,
    /// Free-form detail
    pub reason: String,
}

impl DisconnectReason {
    /// Peer-initiated close with a handshake
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            clean: true,
            reason: reason.into(),
        }
    }

    /// Transport lost without a handshake
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            clean: false,
            reason: reason.into(),
        }
    }

    /// Caller called `disconnect()`
    pub fn manual() -> Self {
        Self::clean(CLOSE_NORMAL, "client disconnect")
    }

    /// Watchdog fired before the transport opened
    pub fn timeout(after: Duration) -> Self {
        Self::abnormal(format!("connection timeout after {}ms", after.as_millis()))
    }

    /// No liveness acknowledgment within the stale threshold
    pub fn stale(silent_for: Duration) -> Self {
        Self::abnormal(format!("no pong for {}ms", silent_for.as_millis()))
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.clean { "clean" } else { "unclean" };
        write!(f, "{} close (code {})", kind, self.code)?;
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Current phase
    pub phase: ConnectionPhase,
    /// Most recent error surfaced through `on_error`
    pub error: Option<ConnectionError>,
    /// Automatic attempts since the last successful open
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    /// Check if the transport is open
    pub fn connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Check if an attempt is in flight
    pub fn connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    /// Convert to serializable info
    pub fn to_info(&self) -> StatusInfo {
        StatusInfo {
            phase: self.phase,
            connected: self.connected(),
            connecting: self.connecting(),
            error: self.error.as_ref().map(ToString::to_string),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

/// Serializable status for printing
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub phase: ConnectionPhase,
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
}

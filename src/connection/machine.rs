//! Connection state machine
//!
//! Pure decision logic: every input returns the [`Action`]s the driver must
//! perform. No I/O and no clocks are touched here, the caller passes `now`
//! where time matters.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::backoff::ReconnectPolicy;
use super::handler::ConnectionEvent;
use super::heartbeat::{Heartbeat, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_STALE_FACTOR};
use super::state::{ConnectionPhase, ConnectionStatus, DisconnectReason};
use crate::error::ConnectionError;
use crate::metrics::METRICS;
use crate::protocol::{self, Endpoint, InboundFrame};

/// Default connection watchdog
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default pause between teardown and the fresh attempt of `reconnect()`
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Runtime configuration of one manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Where to connect
    pub endpoint: Endpoint,
    /// Channel named in the subscribe frame
    pub channel: String,
    /// Connect on creation and allow connecting at all
    pub enabled: bool,
    /// Backoff and attempt ceiling
    pub reconnect: ReconnectPolicy,
    /// Watchdog for an attempt that never opens
    pub connect_timeout: Duration,
    /// Period of outbound pings
    pub heartbeat_interval: Duration,
    /// Silence after which the transport is presumed dead
    pub stale_threshold: Duration,
    /// Delay before the fresh attempt of `reconnect()`
    pub settle_delay: Duration,
}

impl ManagerConfig {
    /// Defaults for everything but the endpoint
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            channel: protocol::DEFAULT_CHANNEL.to_string(),
            enabled: true,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stale_threshold: DEFAULT_HEARTBEAT_INTERVAL.mul_f64(DEFAULT_STALE_FACTOR),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Side effects requested by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start a transport connect to this URL
    Open(Url),
    /// Drop the live or pending transport without reporting a close
    CloseTransport,
    /// Write a text frame to the open transport
    Send(String),
    /// Arm the connection watchdog
    ArmWatchdog(Duration),
    CancelWatchdog,
    /// Start the periodic heartbeat tick
    StartHeartbeat(Duration),
    StopHeartbeat,
    /// Fire `on_retry_timer` after the delay
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Deliver to the caller's handler
    Emit(ConnectionEvent),
}

/// The connection lifecycle state machine
#[derive(Debug)]
pub struct ConnectionMachine {
    config: ManagerConfig,
    phase: ConnectionPhase,
    enabled: bool,
    manual_disconnect: bool,
    reconnect_attempts: u32,
    error: Option<ConnectionError>,
    heartbeat: Heartbeat,
    retry_pending: bool,
}

impl ConnectionMachine {
    pub fn new(config: ManagerConfig) -> Self {
        let heartbeat = Heartbeat::new(config.heartbeat_interval, config.stale_threshold);
        if heartbeat.interval() != config.heartbeat_interval
            || heartbeat.stale_after() != config.stale_threshold
        {
            warn!(
                interval_ms = heartbeat.interval().as_millis() as u64,
                stale_after_ms = heartbeat.stale_after().as_millis() as u64,
                "Heartbeat timings out of range, adjusted"
            );
        }
        Self {
            enabled: config.enabled,
            config,
            phase: ConnectionPhase::Disconnected,
            manual_disconnect: false,
            reconnect_attempts: 0,
            error: None,
            heartbeat,
            retry_pending: false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn is_manual_disconnect(&self) -> bool {
        self.manual_disconnect
    }

    pub fn is_retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Snapshot for observers
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            phase: self.phase,
            error: self.error.clone(),
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    /// Initial transition on creation
    pub fn start(&mut self) -> Vec<Action> {
        if self.enabled {
            self.connect()
        } else {
            debug!("Manager created disabled, staying idle");
            Vec::new()
        }
    }

    /// Begin an attempt if enabled and idle
    pub fn connect(&mut self) -> Vec<Action> {
        if !self.enabled {
            debug!("Connect ignored: manager disabled");
            return Vec::new();
        }
        if self.phase != ConnectionPhase::Disconnected {
            debug!(phase = %self.phase, "Connect ignored: attempt already live");
            return Vec::new();
        }

        let url = self.config.endpoint.to_url();
        self.phase = ConnectionPhase::Connecting;
        METRICS.connect_attempt();
        info!(
            endpoint = %self.config.endpoint,
            attempt = self.reconnect_attempts,
            "Connecting"
        );

        let mut actions = Vec::with_capacity(3);
        if std::mem::take(&mut self.retry_pending) {
            actions.push(Action::CancelReconnect);
        }
        actions.push(Action::Open(url));
        actions.push(Action::ArmWatchdog(self.config.connect_timeout));
        actions
    }

    /// Transport opened
    pub fn on_open(&mut self, now: Instant) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connecting {
            debug!(phase = %self.phase, "Ignoring open outside of an attempt");
            return Vec::new();
        }

        self.phase = ConnectionPhase::Connected;
        self.reconnect_attempts = 0;
        self.manual_disconnect = false;
        self.error = None;
        self.heartbeat.reset(now);
        METRICS.connection_opened();
        info!(endpoint = %self.config.endpoint, "Connected");

        let mut actions = vec![Action::CancelWatchdog];
        if let Some(id) = self.config.endpoint.conversation_id() {
            debug!(channel = %self.config.channel, id, "Subscribing");
            actions.push(Action::Send(protocol::subscribe_frame(
                &self.config.channel,
                id,
            )));
        }
        actions.push(Action::StartHeartbeat(self.heartbeat.interval()));
        actions.push(Action::Emit(ConnectionEvent::Connected));
        actions
    }

    /// Transport closed, cleanly or not
    pub fn on_close(&mut self, reason: DisconnectReason) -> Vec<Action> {
        if self.phase == ConnectionPhase::Disconnected {
            trace!(%reason, "Close after teardown, ignoring");
            return Vec::new();
        }

        self.phase = ConnectionPhase::Disconnected;
        METRICS.disconnected();
        info!(code = reason.code, clean = reason.clean, %reason, "Disconnected");

        let mut actions = vec![
            Action::CancelWatchdog,
            Action::StopHeartbeat,
            Action::Emit(ConnectionEvent::Disconnected(reason)),
        ];

        if self.manual_disconnect {
            debug!("Disconnect was caller-initiated, not reconnecting");
            return actions;
        }

        actions.extend(self.schedule_retry());
        actions
    }

    fn schedule_retry(&mut self) -> Vec<Action> {
        let max = self.config.reconnect.max_attempts;
        if !self.config.reconnect.allows(self.reconnect_attempts) {
            let err = ConnectionError::RetriesExhausted {
                attempts: self.reconnect_attempts,
                max,
            };
            error!(attempts = self.reconnect_attempts, max, "Giving up on reconnecting");
            METRICS.retries_exhausted();
            self.error = Some(err.clone());
            return vec![Action::Emit(ConnectionEvent::Error(err))];
        }

        self.reconnect_attempts += 1;
        let delay = self.config.reconnect.delay_for(self.reconnect_attempts);
        self.retry_pending = true;
        METRICS.reconnect_scheduled();
        info!(
            attempt = self.reconnect_attempts,
            max,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        vec![Action::ScheduleReconnect(delay)]
    }

    /// Backoff or settling timer fired
    pub fn on_retry_timer(&mut self) -> Vec<Action> {
        self.retry_pending = false;
        self.connect()
    }

    /// Watchdog fired
    pub fn on_watchdog(&mut self) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connecting {
            return Vec::new();
        }

        warn!(
            timeout_ms = self.config.connect_timeout.as_millis() as u64,
            "Connection attempt timed out"
        );
        METRICS.connect_timeout();

        let mut actions = vec![Action::CloseTransport];
        actions.extend(self.on_close(DisconnectReason::timeout(self.config.connect_timeout)));
        actions
    }

    /// Transport reported an error; the close that follows drives the state
    pub fn on_transport_error(&mut self, err: ConnectionError) -> Vec<Action> {
        warn!(error = %err, "Transport error");
        METRICS.error();
        self.error = Some(err.clone());
        vec![Action::Emit(ConnectionEvent::Error(err))]
    }

    /// Connect failed before the transport ever opened
    pub fn on_connect_failed(&mut self, err: ConnectionError) -> Vec<Action> {
        let mut actions = self.on_transport_error(err);
        actions.extend(self.on_close(DisconnectReason::abnormal("connection failed")));
        actions
    }

    /// One inbound text frame
    pub fn on_frame(&mut self, text: &str, now: Instant) -> Vec<Action> {
        METRICS.frame_received();
        match protocol::decode_inbound(text) {
            Ok(InboundFrame::Pong) => {
                trace!("Pong received");
                self.heartbeat.record_ack(now);
                Vec::new()
            }
            Ok(InboundFrame::SessionEstablished { session_id }) => {
                info!(session_id = ?session_id, "Session established");
                Vec::new()
            }
            Ok(InboundFrame::Application(frame)) => {
                METRICS.frame_delivered();
                vec![Action::Emit(ConnectionEvent::Message(frame))]
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping malformed frame");
                METRICS.malformed_frame();
                Vec::new()
            }
        }
    }

    /// Heartbeat tick: ping, or force-close a silent transport
    pub fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connected {
            return Vec::new();
        }

        if self.heartbeat.is_stale(now) {
            let silence = self.heartbeat.silence(now);
            warn!(
                silent_ms = silence.as_millis() as u64,
                threshold_ms = self.heartbeat.stale_after().as_millis() as u64,
                "Connection stale, forcing close"
            );
            METRICS.stale_close();

            let mut actions = vec![Action::CloseTransport];
            actions.extend(self.on_close(DisconnectReason::stale(silence)));
            return actions;
        }

        vec![Action::Send(protocol::ping_frame())]
    }

    /// Caller frame; dropped unless the transport is open
    pub fn send(&mut self, text: String) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connected {
            warn!(phase = %self.phase, "Transport not open, dropping outbound frame");
            METRICS.frame_dropped();
            return Vec::new();
        }
        vec![Action::Send(text)]
    }

    /// Caller-initiated teardown; suppresses automatic reconnection
    pub fn disconnect(&mut self) -> Vec<Action> {
        self.manual_disconnect = true;
        self.retry_pending = false;

        let mut actions = vec![
            Action::CancelReconnect,
            Action::CancelWatchdog,
            Action::StopHeartbeat,
        ];

        if self.phase != ConnectionPhase::Disconnected {
            info!(phase = %self.phase, "Disconnecting");
            self.phase = ConnectionPhase::Disconnected;
            METRICS.disconnected();
            actions.push(Action::CloseTransport);
            actions.push(Action::Emit(ConnectionEvent::Disconnected(
                DisconnectReason::manual(),
            )));
        }
        actions
    }

    /// Fresh start: teardown, reset the counter, connect after settling
    pub fn reconnect(&mut self) -> Vec<Action> {
        info!("Reconnect requested");
        let mut actions = self.disconnect();

        self.reconnect_attempts = 0;
        self.manual_disconnect = false;
        self.error = None;
        self.retry_pending = true;

        actions.push(Action::ScheduleReconnect(self.config.settle_delay));
        actions
    }

    /// Host regained foreground visibility
    pub fn on_visible(&mut self) -> Vec<Action> {
        if !self.enabled || self.manual_disconnect || self.phase != ConnectionPhase::Disconnected {
            return Vec::new();
        }
        info!("Visible again while disconnected, reconnecting");
        self.reconnect()
    }

    /// Toggle the `enabled` flag
    pub fn set_enabled(&mut self, enabled: bool) -> Vec<Action> {
        if self.enabled == enabled {
            return Vec::new();
        }
        self.enabled = enabled;
        if enabled {
            self.manual_disconnect = false;
            self.connect()
        } else {
            self.disconnect()
        }
    }
}

//! Connection manager
//!
//! Public handle plus the task that owns the transport and every timer.
//! Handle methods only enqueue commands; the task applies them to the
//! [`ConnectionMachine`] and performs the resulting actions in order.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::handler::ConnectionHandler;
use super::machine::{Action, ConnectionMachine, ManagerConfig};
use super::state::ConnectionStatus;
use crate::error::ConnectionError;
use crate::metrics::{self, METRICS};
use crate::transport::{Connector, Transport, TransportEvent};
use crate::visibility::{Visibility, VisibilityWatcher};

/// Upper bound on a graceful transport close
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type ConnectFuture<T> = Pin<Box<dyn Future<Output = Result<T, ConnectionError>> + Send>>;

/// Commands sent from the handle to the manager task
#[derive(Debug)]
enum Command {
    Disconnect,
    Reconnect,
    Resume,
    SetEnabled(bool),
    Send(String),
    Shutdown,
}

/// Handle to one managed connection
///
/// Dropping the handle tears the connection down.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status: Arc<RwLock<ConnectionStatus>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Start managing a connection; connects right away when enabled
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C, H>(config: ManagerConfig, connector: C, handler: H) -> Self
    where
        C: Connector,
        H: ConnectionHandler,
    {
        Self::spawn_inner(config, connector, handler, None)
    }

    /// Like [`spawn`](Self::spawn), reconnecting when `visibility` turns visible
    pub fn spawn_with_visibility<C, H>(
        config: ManagerConfig,
        connector: C,
        handler: H,
        visibility: VisibilityWatcher,
    ) -> Self
    where
        C: Connector,
        H: ConnectionHandler,
    {
        Self::spawn_inner(config, connector, handler, Some(visibility))
    }

    fn spawn_inner<C, H>(
        config: ManagerConfig,
        connector: C,
        handler: H,
        visibility: Option<VisibilityWatcher>,
    ) -> Self
    where
        C: Connector,
        H: ConnectionHandler,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let mut machine = ConnectionMachine::new(config);
        let initial = machine.start();
        let status = Arc::new(RwLock::new(machine.status()));

        let driver = Driver {
            machine,
            connector: Arc::new(connector),
            handler,
            status: status.clone(),
            transport: None,
            pending: None,
            watchdog: None,
            retry: None,
            heartbeat: None,
        };
        let task = tokio::spawn(driver.run(initial, cmd_rx, visibility));

        Self {
            cmd_tx,
            status,
            task: Some(task),
        }
    }

    /// Caller-initiated teardown; no automatic reconnect follows
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Tear down, reset the attempt counter and connect again after settling
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Host came back to the foreground
    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    /// Toggle whether the manager may connect at all
    pub fn set_enabled(&self, enabled: bool) {
        self.command(Command::SetEnabled(enabled));
    }

    /// Serialize and send a frame if the transport is open; dropped otherwise
    pub fn send_message<T: Serialize + ?Sized>(&self, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(text) => self.command(Command::Send(text)),
            Err(e) => {
                let err = ConnectionError::Encode(e.to_string());
                warn!(error = %err, "Dropping outbound frame");
                METRICS.frame_dropped();
            }
        }
    }

    /// Current observable state
    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.read().connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.status.read().connecting()
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.status.read().error.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.status.read().reconnect_attempts
    }

    /// Disconnect and wait for the manager task to finish
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("Connection task already stopped");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

/// State owned by the manager task
struct Driver<C: Connector, H> {
    machine: ConnectionMachine,
    connector: Arc<C>,
    handler: H,
    status: Arc<RwLock<ConnectionStatus>>,
    transport: Option<C::Transport>,
    pending: Option<ConnectFuture<C::Transport>>,
    watchdog: Option<Instant>,
    retry: Option<Instant>,
    heartbeat: Option<Interval>,
}

impl<C, H> Driver<C, H>
where
    C: Connector,
    H: ConnectionHandler,
{
    async fn run(
        mut self,
        initial: Vec<Action>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut visibility: Option<VisibilityWatcher>,
    ) {
        self.execute(initial).await;

        loop {
            let actions = tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        debug!("Connection manager shutting down");
                        let actions = self.machine.disconnect();
                        self.execute(actions).await;
                        break;
                    }
                    Some(cmd) => self.apply(cmd),
                },

                _ = sleep_until(self.watchdog) => {
                    self.watchdog = None;
                    self.machine.on_watchdog()
                }

                _ = sleep_until(self.retry) => {
                    self.retry = None;
                    self.machine.on_retry_timer()
                }

                now = tick(&mut self.heartbeat) => self.machine.on_heartbeat_tick(now),

                result = connect_result(&mut self.pending) => {
                    self.pending = None;
                    match result {
                        Ok(transport) => {
                            self.transport = Some(transport);
                            self.machine.on_open(Instant::now())
                        }
                        Err(e) => self.machine.on_connect_failed(e),
                    }
                }

                event = next_event(&mut self.transport) => match event {
                    TransportEvent::Frame(text) => self.machine.on_frame(&text, Instant::now()),
                    TransportEvent::Error(e) => {
                        self.machine.on_transport_error(ConnectionError::Transport(e))
                    }
                    TransportEvent::Closed(reason) => {
                        self.transport = None;
                        self.machine.on_close(reason)
                    }
                },

                change = visibility_change(&mut visibility) => match change {
                    Some(Visibility::Visible) => self.machine.on_visible(),
                    Some(Visibility::Hidden) => {
                        debug!("Host hidden");
                        Vec::new()
                    }
                    None => {
                        visibility = None;
                        Vec::new()
                    }
                },
            };

            self.execute(actions).await;
        }
    }

    fn apply(&mut self, cmd: Command) -> Vec<Action> {
        match cmd {
            Command::Disconnect | Command::Shutdown => self.machine.disconnect(),
            Command::Reconnect => self.machine.reconnect(),
            Command::Resume => self.machine.on_visible(),
            Command::SetEnabled(enabled) => self.machine.set_enabled(enabled),
            Command::Send(text) => self.machine.send(text),
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        // Observers see the new state before any callback runs
        self.publish();

        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Open(url) => {
                    let connector = self.connector.clone();
                    debug!(transport = connector.name(), %url, "Opening transport");
                    self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
                }
                Action::CloseTransport => {
                    self.pending = None;
                    if let Some(mut transport) = self.transport.take() {
                        if tokio::time::timeout(CLOSE_GRACE, transport.close())
                            .await
                            .is_err()
                        {
                            debug!("Transport close timed out");
                        }
                    }
                }
                Action::Send(text) => match self.transport.as_mut() {
                    Some(transport) => match transport.send(text).await {
                        Ok(()) => METRICS.frame_sent(),
                        Err(e) => queue.extend(self.machine.on_transport_error(e)),
                    },
                    None => {
                        warn!("No open transport for outbound frame");
                        METRICS.frame_dropped();
                    }
                },
                Action::ArmWatchdog(timeout) => self.watchdog = Some(Instant::now() + timeout),
                Action::CancelWatchdog => self.watchdog = None,
                Action::StartHeartbeat(period) => {
                    let mut heartbeat = interval_at(Instant::now() + period, period);
                    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(heartbeat);
                }
                Action::StopHeartbeat => self.heartbeat = None,
                Action::ScheduleReconnect(delay) => self.retry = Some(Instant::now() + delay),
                Action::CancelReconnect => self.retry = None,
                Action::Emit(event) => self.handler.dispatch(event),
            }
        }

        self.publish();
    }

    fn publish(&self) {
        let status = self.machine.status();
        let mut current = self.status.write();
        if *current != status {
            metrics::set_phase(status.phase);
            *current = status;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) -> Instant {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => pending().await,
    }
}

async fn connect_result<T>(pending_connect: &mut Option<ConnectFuture<T>>) -> Result<T, ConnectionError> {
    match pending_connect {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_event<T: Transport>(transport: &mut Option<T>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

async fn visibility_change(watcher: &mut Option<VisibilityWatcher>) -> Option<Visibility> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => pending().await,
    }
}

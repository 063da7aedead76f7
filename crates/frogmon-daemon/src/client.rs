//! Client for a single Dart Frog daemon process
//!
//! A [`DaemonClient`] owns the daemon's lifecycle (`NotInvoked` →
//! `Invoking` → `Ready`), the message bus its output is published on, and
//! the request id generator used to correlate responses.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use frogmon_core::events::{Channel, DaemonMessage, DaemonResponse};
use frogmon_core::prelude::*;

use crate::bus::{ListenerId, MessageBus};
use crate::commands::{CommandSender, DaemonCommand, RequestIdGenerator};
use crate::process::{DaemonProcess, ExitHandle};
use crate::protocol;

/// Program used to run the daemon
pub const DEFAULT_PROGRAM: &str = "dart_frog";

/// Lifecycle of the daemon process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    NotInvoked,
    Invoking,
    Ready,
}

/// How to launch the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: vec!["daemon".to_string()],
        }
    }
}

/// Live connection to an invoked daemon
#[derive(Clone)]
struct Connection {
    sender: CommandSender,
    exit: ExitHandle,
}

/// Resets the state to `NotInvoked` unless disarmed, so a failed or
/// cancelled `invoke` never leaves the client stuck in `Invoking`.
struct InvokeGuard<'a> {
    state_tx: &'a watch::Sender<DaemonState>,
    armed: bool,
}

impl Drop for InvokeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state_tx.send_replace(DaemonState::NotInvoked);
        }
    }
}

/// Client for one `dart_frog daemon` process
pub struct DaemonClient {
    config: DaemonConfig,
    bus: MessageBus,
    ids: Arc<RequestIdGenerator>,
    state_tx: watch::Sender<DaemonState>,
    /// Serializes `invoke` and `shutdown`
    process: tokio::sync::Mutex<Option<DaemonProcess>>,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for DaemonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonClient")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new(DaemonConfig::default())
    }
}

impl DaemonClient {
    pub fn new(config: DaemonConfig) -> Self {
        let (state_tx, _) = watch::channel(DaemonState::NotInvoked);
        Self {
            config,
            bus: MessageBus::new(),
            ids: Arc::new(RequestIdGenerator::new()),
            state_tx,
            process: tokio::sync::Mutex::new(None),
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// The bus every daemon message is published on
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn state(&self) -> DaemonState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<DaemonState> {
        self.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DaemonState::Ready
    }

    fn connection(&self) -> Option<Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start the daemon in `working_directory` and wait for `daemon.ready`.
    ///
    /// Returns immediately when already `Ready`. Concurrent calls are
    /// serialized; later callers observe the first call's outcome.
    ///
    /// # Errors
    /// * [`Error::DartFrogNotFound`] / [`Error::ProcessSpawn`] if the
    ///   program cannot be started
    /// * [`Error::ProcessExit`] if the daemon exits before it is ready
    pub async fn invoke(&self, working_directory: &Path) -> Result<()> {
        let mut process = self.process.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        self.state_tx.send_replace(DaemonState::Invoking);
        let mut guard = InvokeGuard {
            state_tx: &self.state_tx,
            armed: true,
        };

        // Installed before spawning so the announcement cannot be missed
        let ready_rx = self
            .bus
            .once(Channel::Event, protocol::as_ready_daemon_event);

        let spawned = DaemonProcess::spawn(
            &self.config.program,
            &self.config.args,
            working_directory,
            self.bus.clone(),
        )?;
        let exit = spawned.exit_handle();

        tokio::select! {
            ready = ready_rx => {
                let ready = ready.map_err(|_| Error::ChannelClosed)?;
                info!(
                    "Daemon ready (version {}, pid {})",
                    ready.version, ready.process_id
                );
            }
            code = exit.wait() => {
                warn!("Daemon exited before it was ready (code: {:?})", code);
                return Err(Error::ProcessExit { code });
            }
        }

        let sender = CommandSender::new(
            spawned.stdin_sender(),
            self.bus.clone(),
            Arc::clone(&self.ids),
        );
        *self.connection.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Connection { sender, exit });
        *process = Some(spawned);

        guard.armed = false;
        self.state_tx.send_replace(DaemonState::Ready);
        Ok(())
    }

    /// Register a listener on one of the bus channels
    pub fn on<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&DaemonMessage) + Send + Sync + 'static,
    {
        self.bus.on(channel, listener)
    }

    /// Remove a listener registered with [`DaemonClient::on`]
    pub fn off(&self, id: ListenerId) -> bool {
        self.bus.off(id)
    }

    fn sender(&self) -> Result<CommandSender> {
        self.connection()
            .map(|connection| connection.sender)
            .ok_or(Error::NotInvoked)
    }

    /// Send a command and wait for the correlated response
    pub async fn send(&self, command: DaemonCommand) -> Result<DaemonResponse> {
        self.sender()?.send(command).await
    }

    /// Send a command and give up after `timeout`
    pub async fn send_with_timeout(
        &self,
        command: DaemonCommand,
        timeout: Duration,
    ) -> Result<DaemonResponse> {
        self.sender()?.send_with_timeout(command, timeout).await
    }

    /// Whether an invoked daemon has since exited
    pub fn has_exited(&self) -> bool {
        self.connection()
            .is_some_and(|connection| connection.exit.has_exited())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.connection()
            .and_then(|connection| connection.exit.code())
    }

    /// Wait for the invoked daemon to exit. Returns `None` right away if it
    /// was never invoked.
    pub async fn wait_for_exit(&self) -> Option<i32> {
        match self.connection() {
            Some(connection) => connection.exit.wait().await,
            None => None,
        }
    }

    /// Ask the daemon to terminate, force-killing it if it does not comply.
    pub async fn shutdown(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        let Some(running) = process.as_mut() else {
            return Ok(());
        };
        let sender = self.connection().map(|connection| connection.sender);
        running.shutdown(sender.as_ref()).await
    }
}

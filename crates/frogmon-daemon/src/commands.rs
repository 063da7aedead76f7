//! Command building and request correlation for Dart Frog daemon communication
//!
//! This module provides:
//! - Request id generation for matching responses
//! - Command building for the daemon's request format
//! - A sender that writes requests and awaits the correlated response

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use frogmon_core::events::{Channel, DaemonMessage, DaemonRequest, DaemonResponse};
use frogmon_core::prelude::*;

use crate::bus::{MessageBus, Once};
use crate::protocol::{self, encode_line};

/// Mints request ids that are unique for the lifetime of this generator
///
/// Ids are decimal strings counting up from `"1"`.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Generate the next request id
    pub fn generate(&self) -> String {
        self.next.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

/// Commands that can be sent to the Dart Frog daemon
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonCommand {
    /// Ask the daemon for its version
    RequestVersion,
    /// Terminate the daemon
    Kill,
    /// Start a dev server for a project
    StartDevServer {
        working_directory: String,
        port: u16,
        dart_vm_service_port: u16,
    },
    /// Hot reload a running application
    ReloadDevServer { application_id: String },
    /// Stop a running application
    StopDevServer { application_id: String },
}

impl DaemonCommand {
    pub fn method(&self) -> &'static str {
        match self {
            DaemonCommand::RequestVersion => protocol::DAEMON_REQUEST_VERSION,
            DaemonCommand::Kill => protocol::DAEMON_KILL,
            DaemonCommand::StartDevServer { .. } => protocol::DEV_SERVER_START,
            DaemonCommand::ReloadDevServer { .. } => protocol::DEV_SERVER_RELOAD,
            DaemonCommand::StopDevServer { .. } => protocol::DEV_SERVER_STOP,
        }
    }

    pub fn params(&self) -> Option<Value> {
        match self {
            DaemonCommand::RequestVersion | DaemonCommand::Kill => None,
            DaemonCommand::StartDevServer {
                working_directory,
                port,
                dart_vm_service_port,
            } => Some(json!({
                "workingDirectory": working_directory,
                "port": port,
                "dartVmServicePort": dart_vm_service_port,
            })),
            DaemonCommand::ReloadDevServer { application_id }
            | DaemonCommand::StopDevServer { application_id } => {
                Some(json!({ "applicationId": application_id }))
            }
        }
    }

    /// Build the request envelope for the given id
    pub fn build(&self, id: impl Into<String>) -> DaemonRequest {
        DaemonRequest::new(id, self.method(), self.params())
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            DaemonCommand::RequestVersion => "request version",
            DaemonCommand::Kill => "kill daemon",
            DaemonCommand::StartDevServer { .. } => "start dev server",
            DaemonCommand::ReloadDevServer { .. } => "reload dev server",
            DaemonCommand::StopDevServer { .. } => "stop dev server",
        }
    }
}

impl std::fmt::Display for DaemonCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Render a daemon `error` payload as a message
fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Sends commands to the daemon process and correlates their responses
///
/// Each request is published on the bus's `Request` channel before it is
/// written to stdin, so listeners observe our own requests the same way they
/// observe echoed ones.
#[derive(Clone)]
pub struct CommandSender {
    /// Channel to the daemon's stdin writer
    stdin_tx: mpsc::Sender<String>,
    bus: MessageBus,
    ids: Arc<RequestIdGenerator>,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("stdin_tx", &"<channel>")
            .field("bus", &self.bus)
            .finish()
    }
}

impl CommandSender {
    pub fn new(
        stdin_tx: mpsc::Sender<String>,
        bus: MessageBus,
        ids: Arc<RequestIdGenerator>,
    ) -> Self {
        Self { stdin_tx, bus, ids }
    }

    /// Create a CommandSender for testing (uses a dummy channel)
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn new_for_test() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx, MessageBus::new(), Arc::new(RequestIdGenerator::new()))
    }

    /// Write a request and return the pending match for its response.
    ///
    /// A stdin slot is reserved before the request is published, so bus
    /// listeners only see requests the writer task has accepted.
    async fn dispatch(&self, command: &DaemonCommand) -> Result<(String, Once<DaemonResponse>)> {
        let id = self.ids.generate();
        let request = command.build(id.clone());

        let wanted = id.clone();
        let response_rx = self.bus.once(Channel::Response, move |message| {
            message
                .as_response()
                .filter(|response| response.id == wanted)
                .cloned()
        });

        self.write(&id, command, request).await?;
        Ok((id, response_rx))
    }

    async fn write(
        &self,
        id: &str,
        command: &DaemonCommand,
        request: DaemonRequest,
    ) -> Result<()> {
        let line = encode_line(&request)?;
        let permit = self
            .stdin_tx
            .reserve()
            .await
            .map_err(|_| Error::channel_send("daemon stdin"))?;

        debug!("Sending command #{}: {}", id, command.description());
        self.bus.publish(&DaemonMessage::Request(request));
        permit.send(line);
        Ok(())
    }

    fn into_result(id: &str, response: DaemonResponse) -> Result<DaemonResponse> {
        match &response.error {
            Some(error) => {
                let message = error_message(error);
                debug!("Command #{} failed: {}", id, message);
                Err(Error::daemon(message))
            }
            None => {
                debug!("Command #{} completed", id);
                Ok(response)
            }
        }
    }

    /// Send a command and wait for its response, however long it takes
    ///
    /// # Errors
    /// * [`Error::Daemon`] when the daemon answers with an `error`
    /// * [`Error::ChannelSend`] when the daemon's stdin is gone
    /// * [`Error::ChannelClosed`] when the bus is dropped before a response
    pub async fn send(&self, command: DaemonCommand) -> Result<DaemonResponse> {
        let (id, response_rx) = self.dispatch(&command).await?;
        let response = response_rx.await.map_err(|_| Error::ChannelClosed)?;
        Self::into_result(&id, response)
    }

    /// Send a command with a caller-imposed deadline
    pub async fn send_with_timeout(
        &self,
        command: DaemonCommand,
        timeout: Duration,
    ) -> Result<DaemonResponse> {
        let (id, response_rx) = self.dispatch(&command).await?;

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => Self::into_result(&id, response),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => Err(Error::timeout(
                format!("response to '{}' (#{})", command.description(), id),
                timeout,
            )),
        }
    }

    /// Send a fire-and-forget command (no response awaited)
    pub async fn send_fire_and_forget(&self, command: DaemonCommand) -> Result<String> {
        let id = self.ids.generate();
        let request = command.build(id.clone());
        self.write(&id, &command, request).await?;
        Ok(id)
    }
}

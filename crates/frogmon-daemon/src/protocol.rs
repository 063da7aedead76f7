//! Wire protocol handling for the Dart Frog daemon
//!
//! The daemon writes one JSON array per line on stdout, each array holding
//! zero or more message objects. This module turns raw bytes into messages
//! ([`decode`], [`MessageDecoder`]), classifies them structurally
//! ([`is_request`], [`is_response`], [`is_event`], [`classify`]) and provides
//! refinement guards that check the exact method/event name and the type of
//! every required parameter.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use frogmon_core::events::{
    ApplicationExit, ApplicationParams, ApplicationStarting, DaemonEvent, DaemonMessage,
    DaemonReady, DaemonRequest, DaemonResponse, DevServerEvent, LoggerMessage, ProgressMessage,
    StartDevServerParams,
};
use frogmon_core::prelude::*;

// ─────────────────────────────────────────────────────────
// Method and Event Names
// ─────────────────────────────────────────────────────────

pub const DAEMON_READY: &str = "daemon.ready";
pub const DAEMON_REQUEST_VERSION: &str = "daemon.requestVersion";
pub const DAEMON_KILL: &str = "daemon.kill";

pub const DEV_SERVER_START: &str = "dev_server.start";
pub const DEV_SERVER_RELOAD: &str = "dev_server.reload";
pub const DEV_SERVER_STOP: &str = "dev_server.stop";

pub const APPLICATION_STARTING: &str = "dev_server.applicationStarting";
pub const APPLICATION_EXIT: &str = "dev_server.applicationExit";
pub const LOGGER_DETAIL: &str = "dev_server.loggerDetail";
pub const LOGGER_INFO: &str = "dev_server.loggerInfo";
pub const LOGGER_WARNING: &str = "dev_server.loggerWarning";
pub const LOGGER_ERROR: &str = "dev_server.loggerError";
pub const PROGRESS_START: &str = "dev_server.progressStart";
pub const PROGRESS_UPDATE: &str = "dev_server.progressUpdate";
pub const PROGRESS_COMPLETE: &str = "dev_server.progressComplete";

// ─────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────

/// Decode a buffer of newline-separated JSON arrays into its messages.
///
/// Blank lines are skipped. Elements are returned in line order, then in
/// array order. Any malformed line fails the whole call.
///
/// # Errors
/// * [`Error::Protocol`] if the input is not UTF-8, a line is not valid
///   JSON, or a line is valid JSON but not an array.
pub fn decode(bytes: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::protocol(format!("daemon output is not UTF-8: {}", e)))?;

    let mut messages = Vec::new();
    for line in text.split('\n') {
        messages.extend(decode_line(line)?);
    }
    Ok(messages)
}

/// Decode a single line. Blank lines decode to nothing.
fn decode_line(line: &str) -> Result<Vec<Value>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(Error::protocol(format!(
            "expected a JSON array, got: {}",
            truncate(&other.to_string())
        ))),
        Err(e) => Err(Error::protocol(format!(
            "malformed daemon line ({}): {}",
            e,
            truncate(line)
        ))),
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 120;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Streaming decoder that reassembles lines split across reads.
///
/// Bytes are buffered until a newline arrives. Each complete line is
/// decoded independently, so one malformed line does not poison the lines
/// around it.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the daemon
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete line, if any.
    ///
    /// Returns `None` when no complete line is buffered. A malformed line is
    /// consumed and reported as `Some(Err(..))`.
    pub fn next_batch(&mut self) -> Option<Result<Vec<Value>>> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            match decode(&line) {
                Ok(batch) if batch.is_empty() && is_blank(&line) => continue,
                result => return Some(result),
            }
        }
    }

    /// Push a chunk and decode every complete line in it.
    ///
    /// Stops at the first malformed line; lines after it stay buffered for
    /// the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Value>> {
        self.push(chunk);
        let mut messages = Vec::new();
        while let Some(batch) = self.next_batch() {
            messages.extend(batch?);
        }
        Ok(messages)
    }

    /// Decode whatever is left once the stream has ended
    pub fn finish(mut self) -> Result<Vec<Value>> {
        let rest = std::mem::take(&mut self.buffer);
        decode(&rest)
    }

    /// Number of bytes waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

/// Serialize a request into the daemon's line format (`[{...}]`).
///
/// The trailing newline is added by the stdin writer.
pub fn encode_line(request: &DaemonRequest) -> Result<String> {
    Ok(serde_json::to_string(&[request])?)
}

// ─────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────

fn has_string(value: &Value, key: &str) -> bool {
    value.get(key).is_some_and(Value::is_string)
}

/// A request carries a string `id` and a string `method`
pub fn is_request(value: &Value) -> bool {
    has_string(value, "id") && has_string(value, "method")
}

/// A response carries a string `id` and no `method` at all
pub fn is_response(value: &Value) -> bool {
    has_string(value, "id") && value.get("method").is_none()
}

/// An event carries a string `event`
pub fn is_event(value: &Value) -> bool {
    has_string(value, "event")
}

/// Classify a decoded object, checking request, response, then event.
///
/// Returns `None` for objects that match none of the three shapes.
pub fn classify(value: Value) -> Option<DaemonMessage> {
    if is_request(&value) {
        DaemonRequest::deserialize(value)
            .ok()
            .map(DaemonMessage::Request)
    } else if is_response(&value) {
        DaemonResponse::deserialize(value)
            .ok()
            .map(DaemonMessage::Response)
    } else if is_event(&value) {
        DaemonEvent::deserialize(value)
            .ok()
            .map(DaemonMessage::Event)
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────
// Refinement Guards
// ─────────────────────────────────────────────────────────

fn typed_params<T: DeserializeOwned>(params: Option<&Value>) -> Option<T> {
    // Required fields imply params must be present
    T::deserialize(params?).ok()
}

fn request_params<T: DeserializeOwned>(message: &DaemonMessage, method: &str) -> Option<T> {
    let request = message.as_request()?;
    if request.method != method {
        return None;
    }
    typed_params(request.params.as_ref())
}

fn event_params<T: DeserializeOwned>(message: &DaemonMessage, name: &str) -> Option<T> {
    let event = message.as_event()?;
    if event.event != name {
        return None;
    }
    typed_params(event.params.as_ref())
}

pub fn as_ready_daemon_event(message: &DaemonMessage) -> Option<DaemonReady> {
    event_params(message, DAEMON_READY)
}

pub fn is_ready_daemon_event(message: &DaemonMessage) -> bool {
    as_ready_daemon_event(message).is_some()
}

pub fn as_start_dev_server_request(message: &DaemonMessage) -> Option<StartDevServerParams> {
    request_params(message, DEV_SERVER_START)
}

pub fn is_start_dev_server_request(message: &DaemonMessage) -> bool {
    as_start_dev_server_request(message).is_some()
}

pub fn as_reload_dev_server_request(message: &DaemonMessage) -> Option<ApplicationParams> {
    request_params(message, DEV_SERVER_RELOAD)
}

pub fn is_reload_dev_server_request(message: &DaemonMessage) -> bool {
    as_reload_dev_server_request(message).is_some()
}

pub fn as_stop_dev_server_request(message: &DaemonMessage) -> Option<ApplicationParams> {
    request_params(message, DEV_SERVER_STOP)
}

pub fn is_stop_dev_server_request(message: &DaemonMessage) -> bool {
    as_stop_dev_server_request(message).is_some()
}

pub fn as_application_starting_event(message: &DaemonMessage) -> Option<ApplicationStarting> {
    event_params(message, APPLICATION_STARTING)
}

pub fn is_application_starting_event(message: &DaemonMessage) -> bool {
    as_application_starting_event(message).is_some()
}

pub fn as_application_exit_event(message: &DaemonMessage) -> Option<ApplicationExit> {
    event_params(message, APPLICATION_EXIT)
}

pub fn is_application_exit_event(message: &DaemonMessage) -> bool {
    as_application_exit_event(message).is_some()
}

pub fn as_logger_info_event(message: &DaemonMessage) -> Option<LoggerMessage> {
    event_params(message, LOGGER_INFO)
}

pub fn is_logger_info_event(message: &DaemonMessage) -> bool {
    as_logger_info_event(message).is_some()
}

pub fn as_progress_complete_event(message: &DaemonMessage) -> Option<ProgressMessage> {
    event_params(message, PROGRESS_COMPLETE)
}

pub fn is_progress_complete_event(message: &DaemonMessage) -> bool {
    as_progress_complete_event(message).is_some()
}

// ─────────────────────────────────────────────────────────
// Typed Event Parsing
// ─────────────────────────────────────────────────────────

/// Parse an event into its typed form.
///
/// Unknown names and events whose params fail their type checks fall back
/// to [`DevServerEvent::Unknown`].
pub fn parse_event(event: &DaemonEvent) -> DevServerEvent {
    let params = event.params.as_ref();
    let parsed = match event.event.as_str() {
        DAEMON_READY => typed_params(params).map(DevServerEvent::Ready),
        APPLICATION_STARTING => typed_params(params).map(DevServerEvent::ApplicationStarting),
        APPLICATION_EXIT => typed_params(params).map(DevServerEvent::ApplicationExit),
        LOGGER_DETAIL => typed_params(params).map(DevServerEvent::LoggerDetail),
        LOGGER_INFO => typed_params(params).map(DevServerEvent::LoggerInfo),
        LOGGER_WARNING => typed_params(params).map(DevServerEvent::LoggerWarning),
        LOGGER_ERROR => typed_params(params).map(DevServerEvent::LoggerError),
        PROGRESS_START => typed_params(params).map(DevServerEvent::ProgressStart),
        PROGRESS_UPDATE => typed_params(params).map(DevServerEvent::ProgressUpdate),
        PROGRESS_COMPLETE => typed_params(params).map(DevServerEvent::ProgressComplete),
        _ => None,
    };

    parsed.unwrap_or_else(|| DevServerEvent::Unknown {
        event: event.event.clone(),
        params: event.params.clone(),
    })
}

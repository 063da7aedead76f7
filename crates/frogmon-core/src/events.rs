//! Domain event definitions for the Dart Frog daemon protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::LogLevel;

// ─────────────────────────────────────────────────────────
// Message Envelopes
// ─────────────────────────────────────────────────────────

/// A request, either sent by us or echoed on the daemon's stdout
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonRequest {
    pub method: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl DaemonRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            id: id.into(),
            params,
        }
    }
}

/// A response to a request, matched by `id`
///
/// Both `result` and `error` may be absent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl DaemonResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An unsolicited notification from the daemon
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl DaemonEvent {
    pub fn new(event: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            event: event.into(),
            params,
        }
    }
}

/// The bus channel a message is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Request,
    Response,
    Event,
}

/// A classified daemon message
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonMessage {
    Request(DaemonRequest),
    Response(DaemonResponse),
    Event(DaemonEvent),
}

impl DaemonMessage {
    pub fn channel(&self) -> Channel {
        match self {
            DaemonMessage::Request(_) => Channel::Request,
            DaemonMessage::Response(_) => Channel::Response,
            DaemonMessage::Event(_) => Channel::Event,
        }
    }

    pub fn as_request(&self) -> Option<&DaemonRequest> {
        match self {
            DaemonMessage::Request(request) => Some(request),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&DaemonResponse> {
        match self {
            DaemonMessage::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&DaemonEvent> {
        match self {
            DaemonMessage::Event(event) => Some(event),
            _ => None,
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self {
            DaemonMessage::Request(r) => format!("Request #{}: {}", r.id, r.method),
            DaemonMessage::Response(r) => {
                if r.is_error() {
                    format!("Response #{}: error", r.id)
                } else {
                    format!("Response #{}: ok", r.id)
                }
            }
            DaemonMessage::Event(e) => format!("Event: {}", e.event),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Typed Payloads
// ─────────────────────────────────────────────────────────

/// `daemon.ready` - the daemon is accepting requests
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonReady {
    pub version: String,
    pub process_id: u64,
}

/// `dev_server.start` parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDevServerParams {
    pub working_directory: String,
    pub port: u16,
    pub dart_vm_service_port: u16,
}

/// `dev_server.reload` / `dev_server.stop` parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationParams {
    pub application_id: String,
}

/// `dev_server.applicationStarting`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStarting {
    pub application_id: String,
    pub request_id: String,
}

/// `dev_server.applicationExit`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationExit {
    pub application_id: String,
    pub request_id: String,
    pub exit_code: i64,
}

/// `dev_server.logger*` - a log line from a running application
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerMessage {
    pub application_id: String,
    pub request_id: String,
    pub working_directory: String,
    pub message: String,
}

/// `dev_server.progress*` - a progress line from a running application
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub application_id: String,
    pub request_id: String,
    pub working_directory: String,
    pub progress_message: String,
    pub progress_id: String,
}

// ─────────────────────────────────────────────────────────
// Typed Events
// ─────────────────────────────────────────────────────────

/// Fully typed daemon event
#[derive(Debug, Clone, PartialEq)]
pub enum DevServerEvent {
    Ready(DaemonReady),

    // Application lifecycle
    ApplicationStarting(ApplicationStarting),
    ApplicationExit(ApplicationExit),

    // Logger
    LoggerDetail(LoggerMessage),
    LoggerInfo(LoggerMessage),
    LoggerWarning(LoggerMessage),
    LoggerError(LoggerMessage),

    // Progress
    ProgressStart(ProgressMessage),
    ProgressUpdate(ProgressMessage),
    ProgressComplete(ProgressMessage),

    // Fallback for unknown or malformed events
    Unknown { event: String, params: Option<Value> },
}

impl DevServerEvent {
    /// The request this event belongs to, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            DevServerEvent::ApplicationStarting(e) => Some(&e.request_id),
            DevServerEvent::ApplicationExit(e) => Some(&e.request_id),
            DevServerEvent::LoggerDetail(l)
            | DevServerEvent::LoggerInfo(l)
            | DevServerEvent::LoggerWarning(l)
            | DevServerEvent::LoggerError(l) => Some(&l.request_id),
            DevServerEvent::ProgressStart(p)
            | DevServerEvent::ProgressUpdate(p)
            | DevServerEvent::ProgressComplete(p) => Some(&p.request_id),
            _ => None,
        }
    }

    /// The application this event belongs to, if any
    pub fn application_id(&self) -> Option<&str> {
        match self {
            DevServerEvent::ApplicationStarting(e) => Some(&e.application_id),
            DevServerEvent::ApplicationExit(e) => Some(&e.application_id),
            DevServerEvent::LoggerDetail(l)
            | DevServerEvent::LoggerInfo(l)
            | DevServerEvent::LoggerWarning(l)
            | DevServerEvent::LoggerError(l) => Some(&l.application_id),
            DevServerEvent::ProgressStart(p)
            | DevServerEvent::ProgressUpdate(p)
            | DevServerEvent::ProgressComplete(p) => Some(&p.application_id),
            _ => None,
        }
    }

    /// Log level for events that carry a printable line
    pub fn log_level(&self) -> Option<LogLevel> {
        match self {
            DevServerEvent::LoggerDetail(_) => Some(LogLevel::Debug),
            DevServerEvent::LoggerInfo(_)
            | DevServerEvent::ProgressStart(_)
            | DevServerEvent::ProgressComplete(_) => Some(LogLevel::Info),
            DevServerEvent::LoggerWarning(_) => Some(LogLevel::Warning),
            DevServerEvent::LoggerError(_) => Some(LogLevel::Error),
            // Updates repeat the start message with a spinner; too noisy
            _ => None,
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self {
            DevServerEvent::Ready(r) => {
                format!("Daemon ready (v{}, pid {})", r.version, r.process_id)
            }
            DevServerEvent::ApplicationStarting(e) => {
                format!("Application {} starting", e.application_id)
            }
            DevServerEvent::ApplicationExit(e) => {
                format!(
                    "Application {} exited with code {}",
                    e.application_id, e.exit_code
                )
            }
            DevServerEvent::LoggerDetail(l)
            | DevServerEvent::LoggerInfo(l)
            | DevServerEvent::LoggerWarning(l)
            | DevServerEvent::LoggerError(l) => l.message.clone(),
            DevServerEvent::ProgressStart(p)
            | DevServerEvent::ProgressUpdate(p)
            | DevServerEvent::ProgressComplete(p) => p.progress_message.clone(),
            DevServerEvent::Unknown { event, .. } => format!("Event: {}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_without_empty_params() {
        let request = DaemonRequest::new("7", "daemon.requestVersion", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"method": "daemon.requestVersion", "id": "7"}));
    }

    #[test]
    fn test_response_without_result_or_error_deserializes() {
        let response: DaemonResponse = serde_json::from_value(json!({"id": "3"})).unwrap();
        assert_eq!(response.id, "3");
        assert!(response.result.is_none());
        assert!(!response.is_error());
    }

    #[test]
    fn test_message_channel_and_summary() {
        let msg = DaemonMessage::Response(DaemonResponse {
            id: "2".to_string(),
            result: None,
            error: Some(json!("boom")),
        });
        assert_eq!(msg.channel(), Channel::Response);
        assert_eq!(msg.summary(), "Response #2: error");
        assert!(msg.as_event().is_none());

        let msg = DaemonMessage::Event(DaemonEvent::new("daemon.ready", None));
        assert_eq!(msg.channel(), Channel::Event);
        assert_eq!(msg.summary(), "Event: daemon.ready");
    }

    #[test]
    fn test_payload_field_names_are_camel_case() {
        let progress: ProgressMessage = serde_json::from_value(json!({
            "applicationId": "a1",
            "requestId": "5",
            "workingDirectory": "/p",
            "progressMessage": "Running on http://localhost:8080",
            "progressId": "p1"
        }))
        .unwrap();
        assert_eq!(progress.progress_id, "p1");

        let ready: DaemonReady =
            serde_json::from_value(json!({"version": "0.0.1", "processId": 75941})).unwrap();
        assert_eq!(ready.process_id, 75941);
    }

    #[test]
    fn test_dev_server_event_helpers() {
        let log = LoggerMessage {
            application_id: "a1".to_string(),
            request_id: "5".to_string(),
            working_directory: "/p".to_string(),
            message: "Hot reload done".to_string(),
        };
        let event = DevServerEvent::LoggerWarning(log);
        assert_eq!(event.request_id(), Some("5"));
        assert_eq!(event.application_id(), Some("a1"));
        assert_eq!(event.log_level(), Some(LogLevel::Warning));
        assert_eq!(event.summary(), "Hot reload done");

        let unknown = DevServerEvent::Unknown {
            event: "route_configuration.changed".to_string(),
            params: None,
        };
        assert_eq!(unknown.request_id(), None);
        assert_eq!(unknown.log_level(), None);
    }
}

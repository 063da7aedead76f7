//! Headless mode - NDJSON event output
//!
//! frogmon has no UI. It prints one JSON object per line on stdout, each
//! with an `event` field naming its type, so scripts and editors can follow
//! the daemon without parsing human-oriented text.
//!
//! # Example Output
//!
//! ```json
//! {"event":"daemon_ready","version":"0.0.1","process_id":75941,"timestamp":1704700001000}
//! {"event":"application_added","application_id":"a1","project_path":"/p","address":"http://localhost:8080","vm_service_uri":"http://127.0.0.1:8181/x=/","port":8080,"vm_service_port":8181,"timestamp":1704700002000}
//! {"event":"log","level":"info","message":"Hot reload is enabled.","application_id":"a1","timestamp":1704700003000}
//! ```

pub mod runner;

use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

use frogmon_core::LogLevel;
use frogmon_daemon::DartFrogApplication;

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// The daemon announced `daemon.ready`
    DaemonReady {
        version: String,
        process_id: u64,
        timestamp: i64,
    },

    /// An application's id, address and VM service URI are all known
    ApplicationAdded {
        application_id: String,
        project_path: String,
        address: Option<String>,
        vm_service_uri: Option<String>,
        port: u16,
        vm_service_port: u16,
        timestamp: i64,
    },

    /// An application exited
    ApplicationRemoved {
        application_id: String,
        timestamp: i64,
    },

    /// Log or progress line from an application
    Log {
        level: LogLevel,
        message: String,
        application_id: Option<String>,
        timestamp: i64,
    },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        // NDJSON: one event per line, flushed immediately
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn daemon_ready(version: &str, process_id: u64) -> Self {
        Self::DaemonReady {
            version: version.to_string(),
            process_id,
            timestamp: Self::now(),
        }
    }

    pub fn application_added(application: &DartFrogApplication) -> Self {
        Self::ApplicationAdded {
            application_id: application.id().unwrap_or_default().to_string(),
            project_path: application.project_path().display().to_string(),
            address: application.address().map(str::to_string),
            vm_service_uri: application.vm_service_uri().map(str::to_string),
            port: application.port(),
            vm_service_port: application.vm_service_port(),
            timestamp: Self::now(),
        }
    }

    pub fn application_removed(application_id: &str) -> Self {
        Self::ApplicationRemoved {
            application_id: application_id.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn log(level: LogLevel, message: String, application_id: Option<String>) -> Self {
        Self::Log {
            level,
            message,
            application_id,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    #[test]
    fn test_daemon_ready_serialization() {
        let value = to_value(&HeadlessEvent::daemon_ready("0.0.1", 75941));

        assert_eq!(value["event"], "daemon_ready");
        assert_eq!(value["version"], "0.0.1");
        assert_eq!(value["process_id"], 75941);
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_application_added_serialization() {
        let mut app = DartFrogApplication::new("/p", 8080, 8181);
        app.identify("a1");
        app.attach_vm_service_uri("http://127.0.0.1:8181/x=/");
        app.attach_address("http://localhost:8080");

        let value = to_value(&HeadlessEvent::application_added(&app));

        assert_eq!(value["event"], "application_added");
        assert_eq!(value["application_id"], "a1");
        assert_eq!(value["project_path"], "/p");
        assert_eq!(value["address"], "http://localhost:8080");
        assert_eq!(value["vm_service_uri"], "http://127.0.0.1:8181/x=/");
        assert_eq!(value["port"], 8080);
        assert_eq!(value["vm_service_port"], 8181);
    }

    #[test]
    fn test_log_serialization() {
        let value = to_value(&HeadlessEvent::log(
            LogLevel::Warning,
            "Slow route".to_string(),
            Some("a1".to_string()),
        ));

        assert_eq!(value["event"], "log");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["message"], "Slow route");
        assert_eq!(value["application_id"], "a1");
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error("Daemon crashed".to_string(), true));

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Daemon crashed");
        assert_eq!(value["fatal"], true);
    }

    #[test]
    fn test_application_removed_serialization() {
        let value = to_value(&HeadlessEvent::application_removed("a1"));
        assert_eq!(value["event"], "application_removed");
        assert_eq!(value["application_id"], "a1");
    }
}

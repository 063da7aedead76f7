//! Test utilities for daemon messages
//!
//! Builders for the messages a Dart Frog daemon publishes, plus a scripted
//! stand-in daemon for process tests.

use serde_json::json;

use frogmon_core::events::{DaemonEvent, DaemonMessage, DaemonRequest, DaemonResponse};

use crate::protocol;

/// `daemon.ready` event
pub fn ready_event(version: &str, process_id: u64) -> DaemonMessage {
    DaemonMessage::Event(DaemonEvent::new(
        protocol::DAEMON_READY,
        Some(json!({ "version": version, "processId": process_id })),
    ))
}

/// `dev_server.start` request as it appears on the bus
pub fn start_request(id: &str, working_directory: &str, port: u16, vm_port: u16) -> DaemonMessage {
    DaemonMessage::Request(DaemonRequest::new(
        id,
        protocol::DEV_SERVER_START,
        Some(json!({
            "workingDirectory": working_directory,
            "port": port,
            "dartVmServicePort": vm_port,
        })),
    ))
}

/// `dev_server.applicationStarting` event
pub fn application_starting(application_id: &str, request_id: &str) -> DaemonMessage {
    DaemonMessage::Event(DaemonEvent::new(
        protocol::APPLICATION_STARTING,
        Some(json!({ "applicationId": application_id, "requestId": request_id })),
    ))
}

/// `dev_server.applicationExit` event
pub fn application_exit(application_id: &str, request_id: &str, exit_code: i64) -> DaemonMessage {
    DaemonMessage::Event(DaemonEvent::new(
        protocol::APPLICATION_EXIT,
        Some(json!({
            "applicationId": application_id,
            "requestId": request_id,
            "exitCode": exit_code,
        })),
    ))
}

/// `dev_server.loggerInfo` event
pub fn logger_info(application_id: &str, request_id: &str, message: &str) -> DaemonMessage {
    DaemonMessage::Event(DaemonEvent::new(
        protocol::LOGGER_INFO,
        Some(json!({
            "applicationId": application_id,
            "requestId": request_id,
            "workingDirectory": "/p",
            "message": message,
        })),
    ))
}

/// `dev_server.progressComplete` event
pub fn progress_complete(
    application_id: &str,
    request_id: &str,
    progress_message: &str,
) -> DaemonMessage {
    DaemonMessage::Event(DaemonEvent::new(
        protocol::PROGRESS_COMPLETE,
        Some(json!({
            "applicationId": application_id,
            "requestId": request_id,
            "workingDirectory": "/p",
            "progressMessage": progress_message,
            "progressId": "p1",
        })),
    ))
}

/// Successful response
pub fn response(id: &str, result: serde_json::Value) -> DaemonMessage {
    DaemonMessage::Response(DaemonResponse {
        id: id.to_string(),
        result: Some(result),
        error: None,
    })
}

/// Serialize messages the way the daemon writes them: one array per line
pub fn to_wire(messages: &[DaemonMessage]) -> String {
    messages
        .iter()
        .map(|message| {
            let value = match message {
                DaemonMessage::Request(r) => serde_json::to_value(r),
                DaemonMessage::Response(r) => serde_json::to_value(r),
                DaemonMessage::Event(e) => serde_json::to_value(e),
            }
            .unwrap_or_default();
            format!("[{}]\n", value)
        })
        .collect()
}

/// A `sh` script that behaves like a minimal daemon.
///
/// It announces `daemon.ready`, then answers every request line with an
/// empty result carrying the request's id, and exits on `daemon.kill`.
pub fn scripted_daemon_args() -> Vec<String> {
    let script = r#"
echo '[{"event":"daemon.ready","params":{"version":"0.0.1","processId":42}}]'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  echo "[{\"id\":\"$id\",\"result\":{}}]"
  case "$line" in
    *daemon.kill*) exit 0 ;;
  esac
done
"#;
    vec!["-c".to_string(), script.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_pass_their_guards() {
        assert!(protocol::is_ready_daemon_event(&ready_event("0.0.1", 1)));
        assert!(protocol::is_start_dev_server_request(&start_request(
            "5", "/p", 8080, 8181
        )));
        assert!(protocol::is_application_starting_event(
            &application_starting("a1", "5")
        ));
        assert!(protocol::is_application_exit_event(&application_exit(
            "a1", "5", 0
        )));
        assert!(protocol::is_logger_info_event(&logger_info("a1", "5", "hi")));
        assert!(protocol::is_progress_complete_event(&progress_complete(
            "a1", "5", "done"
        )));
    }

    #[test]
    fn test_to_wire_decodes_back_in_order() {
        let messages = vec![ready_event("0.0.1", 1), response("1", json!({}))];
        let wire = to_wire(&messages);
        assert_eq!(wire.lines().count(), 2);

        let decoded: Vec<DaemonMessage> = protocol::decode(wire.as_bytes())
            .unwrap()
            .into_iter()
            .filter_map(protocol::classify)
            .collect();
        assert_eq!(decoded, messages);
    }
}

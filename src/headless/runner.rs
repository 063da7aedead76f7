//! Headless mode runner - drives one daemon and prints NDJSON events

use std::path::Path;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use frogmon_core::events::{Channel, DevServerEvent};
use frogmon_core::prelude::Result;
use frogmon_core::LogLevel;
use frogmon_daemon::{
    parse_event, ApplicationRegistry, DaemonClient, DaemonCommand, RegistryEvent,
};

use super::HeadlessEvent;
use crate::config::Settings;

/// Commands read from stdin while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdinCommand {
    Reload,
    Quit,
}

/// Map a daemon event to the headless event it produces, if any
fn headless_event_for(event: &DevServerEvent, min_level: LogLevel) -> Option<HeadlessEvent> {
    if let DevServerEvent::Ready(ready) = event {
        return Some(HeadlessEvent::daemon_ready(&ready.version, ready.process_id));
    }

    let level = event.log_level()?;
    debug!("[{}] {}", level.prefix(), event.summary());
    if !level.is_at_least(min_level) {
        return None;
    }
    Some(HeadlessEvent::log(
        level,
        event.summary(),
        event.application_id().map(str::to_string),
    ))
}

/// Run in headless mode until the last application exits, `q` is read from
/// stdin, Ctrl-C is pressed or the daemon dies.
pub async fn run_headless(
    project_path: &Path,
    settings: &Settings,
    min_level: LogLevel,
) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("frogmon starting in headless mode");
    info!("Project: {}", project_path.display());
    info!("═══════════════════════════════════════════════════════");

    let client = DaemonClient::new(settings.daemon.to_daemon_config());
    let registry = ApplicationRegistry::attach(client.bus());
    let mut registry_rx = registry.subscribe();

    client.on(Channel::Event, move |message| {
        if let Some(event) = message.as_event() {
            if let Some(headless) = headless_event_for(&parse_event(event), min_level) {
                headless.emit();
            }
        }
    });

    let ready_timeout = settings.daemon.ready_timeout();
    let invoked = match tokio::time::timeout(ready_timeout, client.invoke(project_path)).await {
        Ok(result) => result,
        Err(_) => Err(frogmon_core::Error::timeout("daemon.ready", ready_timeout)),
    };
    if let Err(e) = invoked {
        HeadlessEvent::error(e.to_string(), true).emit();
        client.shutdown().await?;
        return Err(e);
    }

    let start = DaemonCommand::StartDevServer {
        working_directory: project_path.display().to_string(),
        port: settings.dev_server.port,
        dart_vm_service_port: settings.dev_server.dart_vm_service_port,
    };
    if let Err(e) = client
        .send_with_timeout(start, settings.daemon.request_timeout())
        .await
    {
        HeadlessEvent::error(e.to_string(), true).emit();
        client.shutdown().await?;
        return Err(e);
    }

    let (stdin_tx, stdin_rx) = mpsc::channel(8);
    std::thread::spawn(move || spawn_stdin_reader_blocking(stdin_tx));

    let result = headless_event_loop(&client, &registry, &mut registry_rx, stdin_rx, settings).await;

    stop_applications(&client, &registry, settings).await;
    registry.detach();
    client.shutdown().await?;

    info!("frogmon headless mode exiting");
    result
}

async fn headless_event_loop(
    client: &DaemonClient,
    registry: &ApplicationRegistry,
    registry_rx: &mut broadcast::Receiver<RegistryEvent>,
    mut stdin_rx: mpsc::Receiver<StdinCommand>,
    settings: &Settings,
) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let daemon_exit = client.wait_for_exit();
    tokio::pin!(daemon_exit);
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = registry_rx.recv() => match event {
                Ok(RegistryEvent::Added(application)) => {
                    HeadlessEvent::application_added(&application).emit();
                }
                Ok(RegistryEvent::Removed(application)) => {
                    HeadlessEvent::application_removed(application.id().unwrap_or_default()).emit();
                    if registry.is_empty() {
                        info!("Last application exited");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Registry events lagged, skipped {}", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            command = stdin_rx.recv(), if stdin_open => match command {
                Some(StdinCommand::Reload) => reload_applications(client, registry, settings).await,
                Some(StdinCommand::Quit) => {
                    info!("Quit requested");
                    break;
                }
                None => {
                    debug!("Stdin closed");
                    stdin_open = false;
                }
            },
            _ = &mut ctrl_c => {
                info!("Ctrl-C received");
                break;
            }
            code = &mut daemon_exit => {
                let message = format!("Daemon exited unexpectedly (code: {:?})", code);
                error!("{}", message);
                HeadlessEvent::error(message, true).emit();
                break;
            }
        }
    }

    Ok(())
}

async fn reload_applications(
    client: &DaemonClient,
    registry: &ApplicationRegistry,
    settings: &Settings,
) {
    for application in registry.all() {
        let Some(id) = application.id() else {
            continue;
        };
        let command = DaemonCommand::ReloadDevServer {
            application_id: id.to_string(),
        };
        match client
            .send_with_timeout(command, settings.daemon.request_timeout())
            .await
        {
            Ok(_) => info!("Reloaded {}", id),
            Err(e) => HeadlessEvent::error(format!("Reload of {} failed: {}", id, e), false).emit(),
        }
    }
}

async fn stop_applications(
    client: &DaemonClient,
    registry: &ApplicationRegistry,
    settings: &Settings,
) {
    if client.has_exited() {
        return;
    }
    for application in registry.all() {
        let Some(id) = application.id() else {
            continue;
        };
        let command = DaemonCommand::StopDevServer {
            application_id: id.to_string(),
        };
        if let Err(e) = client
            .send_with_timeout(command, settings.daemon.request_timeout())
            .await
        {
            warn!("Failed to stop {} (continuing): {}", id, e);
        }
    }
}

fn parse_stdin_command(line: &str) -> Option<StdinCommand> {
    match line.trim() {
        "r" | "reload" => Some(StdinCommand::Reload),
        "q" | "quit" => Some(StdinCommand::Quit),
        _ => None,
    }
}

/// Forward stdin commands to the event loop (blocking, runs on its own thread)
fn spawn_stdin_reader_blocking(tx: mpsc::Sender<StdinCommand>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_stdin_command(&line) {
            Some(command) => {
                info!("Stdin: {:?} requested", command);
                if tx.blocking_send(command).is_err() || command == StdinCommand::Quit {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!("Unknown stdin command: {}", line.trim()),
        }
    }

    info!("Stdin reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use frogmon_core::events::{DaemonReady, LoggerMessage, ProgressMessage};

    fn logger(message: &str) -> LoggerMessage {
        LoggerMessage {
            application_id: "a1".to_string(),
            request_id: "1".to_string(),
            working_directory: "/p".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_ready_always_emitted() {
        let event = DevServerEvent::Ready(DaemonReady {
            version: "0.0.1".to_string(),
            process_id: 1,
        });
        assert!(matches!(
            headless_event_for(&event, LogLevel::Error),
            Some(HeadlessEvent::DaemonReady { .. })
        ));
    }

    #[test]
    fn test_logs_filtered_by_level() {
        let detail = DevServerEvent::LoggerDetail(logger("verbose"));
        assert!(headless_event_for(&detail, LogLevel::Info).is_none());
        assert!(headless_event_for(&detail, LogLevel::Debug).is_some());

        let warning = DevServerEvent::LoggerWarning(logger("careful"));
        match headless_event_for(&warning, LogLevel::Info) {
            Some(HeadlessEvent::Log {
                level,
                message,
                application_id,
                ..
            }) => {
                assert_eq!(level, LogLevel::Warning);
                assert_eq!(message, "careful");
                assert_eq!(application_id.as_deref(), Some("a1"));
            }
            other => panic!("expected Log, got {:?}", other),
        }
    }

    #[test]
    fn test_progress_updates_are_not_emitted() {
        let update = DevServerEvent::ProgressUpdate(ProgressMessage {
            application_id: "a1".to_string(),
            request_id: "1".to_string(),
            working_directory: "/p".to_string(),
            progress_message: "Compiling".to_string(),
            progress_id: "p1".to_string(),
        });
        assert!(headless_event_for(&update, LogLevel::Debug).is_none());
    }

    #[test]
    fn test_parse_stdin_command() {
        assert_eq!(parse_stdin_command("r"), Some(StdinCommand::Reload));
        assert_eq!(parse_stdin_command(" reload "), Some(StdinCommand::Reload));
        assert_eq!(parse_stdin_command("q"), Some(StdinCommand::Quit));
        assert_eq!(parse_stdin_command("restart"), None);
    }
}

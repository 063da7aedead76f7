//! Dart Frog daemon process management

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use frogmon_core::prelude::*;

use crate::bus::MessageBus;
use crate::commands::{CommandSender, DaemonCommand};
use crate::protocol::{self, MessageDecoder};

const READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Default)]
struct ExitState {
    exited: AtomicBool,
    code: Mutex<Option<i32>>,
    notify: Notify,
}

/// Shared view of a daemon process's exit, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct ExitHandle {
    state: Arc<ExitState>,
}

impl ExitHandle {
    /// Non-blocking check backed by an atomic flag set by the wait task
    pub fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::Acquire)
    }

    /// Exit code, once the process has exited with one
    pub fn code(&self) -> Option<i32> {
        *self.state.code.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until the process has exited and return its exit code
    pub async fn wait(&self) -> Option<i32> {
        // Create the future before checking so a notification between the
        // check and the await is not lost
        let notified = self.state.notify.notified();
        if !self.has_exited() {
            notified.await;
        }
        self.code()
    }

    fn record(&self, code: Option<i32>) {
        *self.state.code.lock().unwrap_or_else(|e| e.into_inner()) = code;
        self.state.exited.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }
}

/// Manages a `dart_frog daemon` child process.
///
/// Stdout is decoded and every classified message is published on the
/// [`MessageBus`]. The `Child` handle is moved into a dedicated wait task so
/// the real exit code is captured; the process keeps a kill channel to
/// request a force-kill.
pub struct DaemonProcess {
    /// Sender for stdin lines
    stdin_tx: mpsc::Sender<String>,
    /// Process ID for logging
    pid: Option<u32>,
    /// Tells the wait task to force-kill the process. Consumed on first use.
    kill_tx: Option<oneshot::Sender<()>>,
    exit: ExitHandle,
}

impl DaemonProcess {
    /// Spawn `program args` in `working_directory`, publishing its output on `bus`
    ///
    /// # Errors
    /// * [`Error::NoProject`] if `working_directory` is not a directory
    /// * [`Error::DartFrogNotFound`] if `program` cannot be found
    /// * [`Error::ProcessSpawn`] for any other spawn failure
    pub fn spawn(
        program: &str,
        args: &[String],
        working_directory: &Path,
        bus: MessageBus,
    ) -> Result<Self> {
        if !working_directory.is_dir() {
            return Err(Error::no_project(working_directory));
        }

        info!("Spawning daemon: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::dart_frog_not_found(program)
                } else {
                    Error::process_spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        info!("Daemon process started with PID: {:?}", pid);

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::process_spawn("daemon stdio was not piped"));
        };

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(32);
        tokio::spawn(Self::stdin_writer(stdin, stdin_rx));
        tokio::spawn(Self::stdout_reader(stdout, bus));
        tokio::spawn(Self::stderr_reader(stderr));

        let exit = ExitHandle::default();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(Self::wait_for_exit(child, kill_rx, exit.clone()));

        Ok(Self {
            stdin_tx,
            pid,
            kill_tx: Some(kill_tx),
            exit,
        })
    }

    /// Background task: owns `child`, waits for it to exit and records the code.
    async fn wait_for_exit(mut child: Child, kill_rx: oneshot::Receiver<()>, exit: ExitHandle) {
        let code: Option<i32> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Daemon process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for daemon process: {}", e);
                        None
                    }
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing daemon process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill daemon process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        exit.record(code);
    }

    /// Decode stdout and publish every classified message in order.
    async fn stdout_reader(mut stdout: tokio::process::ChildStdout, bus: MessageBus) {
        let mut decoder = MessageDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to read daemon stdout: {}", e);
                    break;
                }
            };

            decoder.push(&buf[..read]);
            while let Some(batch) = decoder.next_batch() {
                match batch {
                    Ok(values) => Self::publish_all(&bus, values),
                    Err(e) => warn!("Dropping daemon output: {}", e),
                }
            }
        }

        match decoder.finish() {
            Ok(values) => Self::publish_all(&bus, values),
            Err(e) => warn!("Dropping trailing daemon output: {}", e),
        }

        debug!("stdout reader finished, process likely exiting");
    }

    fn publish_all(bus: &MessageBus, values: Vec<serde_json::Value>) {
        for value in values {
            match protocol::classify(value) {
                Some(message) => {
                    trace!("daemon -> {}", message.summary());
                    bus.publish(&message);
                }
                None => debug!("Ignoring unclassifiable daemon message"),
            }
        }
    }

    async fn stderr_reader(stderr: tokio::process::ChildStderr) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            warn!("daemon stderr: {}", line);
        }

        debug!("stderr reader finished");
    }

    /// Write lines to stdin
    async fn stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
        while let Some(line) = rx.recv().await {
            debug!("Sending to daemon: {}", line);

            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        debug!("stdin writer finished");
    }

    /// Gracefully shut the daemon down.
    ///
    /// Sends `daemon.kill` when a sender is given, waits up to two seconds
    /// for the process to exit, then force-kills it.
    pub async fn shutdown(&mut self, sender: Option<&CommandSender>) -> Result<()> {
        if self.has_exited() {
            info!("Daemon process already exited, skipping shutdown");
            return Ok(());
        }

        info!("Initiating daemon shutdown");

        if let Some(sender) = sender {
            if let Err(e) = sender.send_fire_and_forget(DaemonCommand::Kill).await {
                warn!("daemon.kill failed (continuing): {}", e);
            }
        }

        match tokio::time::timeout(Duration::from_secs(2), self.exit.wait()).await {
            Ok(code) => {
                info!("Daemon exited gracefully (code: {:?})", code);
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for graceful exit, force killing");
                self.force_kill();
                Ok(())
            }
        }
    }

    fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            // The wait task may have already exited naturally
            let _ = tx.send(());
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit.has_exited()
    }

    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Get the stdin sender for creating a CommandSender
    pub fn stdin_sender(&self) -> mpsc::Sender<String> {
        self.stdin_tx.clone()
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("DaemonProcess dropped while process may still be running");
            self.force_kill();
        }
        debug!("DaemonProcess dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scripted_daemon_args;
    use frogmon_core::events::Channel;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_spawn_missing_directory() {
        let result = DaemonProcess::spawn(
            "sh",
            &sh("exit 0"),
            Path::new("/nonexistent/frogmon/project"),
            MessageBus::new(),
        );
        assert!(matches!(result, Err(Error::NoProject { .. })));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let result = DaemonProcess::spawn(
            "frogmon-no-such-program",
            &[],
            dir.path(),
            MessageBus::new(),
        );
        match result {
            Err(Error::DartFrogNotFound { program }) => {
                assert_eq!(program, "frogmon-no-such-program")
            }
            Err(other) => panic!("expected DartFrogNotFound, got {:?}", other),
            Ok(_) => panic!("expected DartFrogNotFound, got a process"),
        }
    }

    #[tokio::test]
    async fn test_exit_code_captured() {
        let dir = tempfile::tempdir().unwrap();
        let process =
            DaemonProcess::spawn("sh", &sh("exit 42"), dir.path(), MessageBus::new()).unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), process.exit_handle().wait())
            .await
            .expect("process should exit");
        assert_eq!(code, Some(42));
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_stdout_is_published_on_bus() {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::new();
        let ready_rx = bus.once(Channel::Event, protocol::as_ready_daemon_event);

        let _process =
            DaemonProcess::spawn("sh", &scripted_daemon_args(), dir.path(), bus.clone()).unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), ready_rx)
            .await
            .expect("ready in time")
            .expect("bus alive");
        assert_eq!(ready.version, "0.0.1");
        assert_eq!(ready.process_id, 42);
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_stop_reader() {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::new();
        let ready_rx = bus.once(Channel::Event, protocol::as_ready_daemon_event);

        let script = r#"
echo 'this is not json'
echo '{"event":"not.an.array"}'
echo '[{"event":"daemon.ready","params":{"version":"1.2.3","processId":7}}]'
"#;
        let _process = DaemonProcess::spawn("sh", &sh(script), dir.path(), bus.clone()).unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), ready_rx)
            .await
            .expect("ready in time")
            .expect("bus alive");
        assert_eq!(ready.version, "1.2.3");
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::new();
        let ready_rx = bus.once(Channel::Event, protocol::as_ready_daemon_event);

        let script =
            r#"printf '%s' '[{"event":"daemon.ready","params":{"version":"0.0.1","processId":1}}]'"#;
        let _process = DaemonProcess::spawn("sh", &sh(script), dir.path(), bus.clone()).unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), ready_rx)
            .await
            .expect("ready in time")
            .expect("bus alive");
        assert_eq!(ready.process_id, 1);
    }

    #[tokio::test]
    async fn test_shutdown_kills_long_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut process =
            DaemonProcess::spawn("sh", &sh("sleep 60"), dir.path(), MessageBus::new()).unwrap();
        assert!(!process.has_exited());

        process.shutdown(None).await.expect("shutdown should not error");

        let handle = process.exit_handle();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("process should be killed");
        assert!(handle.has_exited());
    }
}

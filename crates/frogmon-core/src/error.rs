//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Daemon Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Dart Frog CLI not found: '{program}' is not in your PATH.")]
    DartFrogNotFound { program: String },

    #[error("Failed to spawn daemon process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Daemon process exited before it was ready (code: {code:?})")]
    ProcessExit { code: Option<i32> },

    #[error("Daemon has not been invoked")]
    NotInvoked,

    #[error("Daemon error: {message}")]
    Daemon { message: String },

    #[error("Daemon protocol error: {message}")]
    Protocol { message: String },

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Project directory not found: {path}")]
    NoProject { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn dart_frog_not_found(program: impl Into<String>) -> Self {
        Self::DartFrogNotFound {
            program: program.into(),
        }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    pub fn daemon(message: impl Into<String>) -> Self {
        Self::Daemon {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn no_project(path: impl Into<PathBuf>) -> Self {
        Self::NoProject { path: path.into() }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Daemon { .. }
                | Error::Protocol { .. }
                | Error::Timeout { .. }
                | Error::ChannelSend { .. }
        )
    }

    /// Check if this error should stop the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DartFrogNotFound { .. }
                | Error::ProcessSpawn { .. }
                | Error::ProcessExit { .. }
                | Error::NoProject { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::daemon("unknown method");
        assert_eq!(err.to_string(), "Daemon error: unknown method");

        let err = Error::dart_frog_not_found("dart_frog");
        assert!(err.to_string().contains("'dart_frog' is not in your PATH"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::dart_frog_not_found("dart_frog").is_fatal());
        assert!(Error::ProcessExit { code: Some(1) }.is_fatal());
        assert!(Error::no_project("/missing").is_fatal());
        assert!(!Error::daemon("test").is_fatal());
        assert!(!Error::NotInvoked.is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::daemon("test").is_recoverable());
        assert!(Error::protocol("bad line").is_recoverable());
        assert!(Error::timeout("response", Duration::from_secs(1)).is_recoverable());
        assert!(!Error::process_spawn("denied").is_recoverable());
    }

    #[test]
    fn test_timeout_display_names_the_wait() {
        let err = Error::timeout("daemon.ready", Duration::from_millis(250));
        let text = err.to_string();
        assert!(text.contains("daemon.ready"));
        assert!(text.contains("250ms"));
    }

    #[test]
    fn test_result_ext_preserves_error() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.context("reading config").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

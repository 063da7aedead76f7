//! # frogmon-core - Core Domain Types
//!
//! Foundation crate for frogmon. Provides the Dart Frog daemon message
//! envelopes and typed payloads, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Events (`events`)
//! - [`DaemonMessage`] - A classified message: request, response or event
//! - [`DaemonRequest`], [`DaemonResponse`], [`DaemonEvent`] - Message envelopes
//! - [`DevServerEvent`] - Typed `daemon.*` / `dev_server.*` events
//! - [`Channel`] - Bus channel a message is published on
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use frogmon_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all frogmon crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{
    ApplicationExit, ApplicationParams, ApplicationStarting, Channel, DaemonEvent, DaemonMessage,
    DaemonReady, DaemonRequest, DaemonResponse, DevServerEvent, LoggerMessage, ProgressMessage,
    StartDevServerParams,
};
pub use types::LogLevel;

//! # frogmon-daemon - Dart Frog Daemon Client
//!
//! Spawns `dart_frog daemon`, decodes its newline-delimited JSON output,
//! classifies every message and correlates requests, responses and events.
//!
//! Depends on [`frogmon_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Protocol
//! - [`decode()`] / [`MessageDecoder`] - Turn daemon output into JSON messages
//! - [`classify()`] - Sort a message into request, response or event
//! - Refinement guards such as [`protocol::as_start_dev_server_request`]
//!
//! ### Process Management
//! - [`DaemonClient`] - Daemon lifecycle, listeners and request/response correlation
//! - [`DaemonProcess`] - The child process and its stdio tasks
//! - [`MessageBus`] - Per-channel listeners for classified messages
//! - [`CommandSender`], [`DaemonCommand`], [`RequestIdGenerator`]
//!
//! ### Applications
//! - [`ApplicationRegistry`] - Applications joined from start requests and their events
//! - [`DartFrogApplication`] - A running dev server

pub mod application;
pub mod bus;
pub mod client;
pub mod commands;
pub mod process;
pub mod protocol;
pub mod registry;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use application::{ApplicationState, DartFrogApplication};
pub use bus::{ListenerId, MessageBus, Once, WeakMessageBus};
pub use client::{DaemonClient, DaemonConfig, DaemonState};
pub use commands::{CommandSender, DaemonCommand, RequestIdGenerator};
/// Re-exported from `frogmon_core` for convenience. Canonical import: `frogmon_core::DaemonMessage`.
pub use frogmon_core::{Channel, DaemonMessage};
pub use process::{DaemonProcess, ExitHandle};
pub use protocol::{classify, decode, encode_line, parse_event, MessageDecoder};
pub use registry::{ApplicationRegistry, RegistryEvent};

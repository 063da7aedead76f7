//! frogmon library
//!
//! Headless driver for the Dart Frog daemon: configuration loading and the
//! NDJSON runner used by the `frogmon` binary.

pub mod config;
pub mod headless;

pub use config::{init_config_dir, load_settings, Settings};
pub use headless::runner::run_headless;
pub use headless::HeadlessEvent;

use std::path::Path;

use frogmon_core::prelude::*;
use frogmon_core::LogLevel;

/// Initialize logging and run the daemon for `project_path`
pub async fn run_with_project(
    project_path: &Path,
    settings: &Settings,
    min_level: LogLevel,
) -> Result<()> {
    frogmon_core::logging::init()?;

    let result = run_headless(project_path, settings, min_level).await;

    if let Err(ref e) = result {
        error!("Application error: {:?}", e);
    }

    result
}

//! frogmon - watch a Dart Frog dev server through its daemon
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use frogmon_core::LogLevel;

/// frogmon - run a Dart Frog dev server and stream its state as NDJSON
#[derive(Parser, Debug)]
#[command(name = "frogmon")]
#[command(about = "Run a Dart Frog dev server and stream its state as NDJSON", long_about = None)]
struct Args {
    /// Path to the Dart Frog project
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Port for the dev server (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Port for the Dart VM service (overrides config)
    #[arg(long)]
    vm_service_port: Option<u16>,

    /// Write a default .frogmon/config.toml and exit
    #[arg(long)]
    init_config: bool,

    /// Include debug-level log lines in the output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let project_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if !project_path.is_dir() {
        return Err(eyre!(
            "Project directory not found: {}",
            project_path.display()
        ));
    }

    if args.init_config {
        frogmon::init_config_dir(&project_path)?;
        eprintln!(
            "Wrote {}",
            project_path.join(".frogmon").join("config.toml").display()
        );
        return Ok(());
    }

    let mut settings = frogmon::load_settings(&project_path);
    if let Some(port) = args.port {
        settings.dev_server.port = port;
    }
    if let Some(port) = args.vm_service_port {
        settings.dev_server.dart_vm_service_port = port;
    }

    let min_level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    frogmon::run_with_project(&project_path, &settings, min_level).await?;
    Ok(())
}

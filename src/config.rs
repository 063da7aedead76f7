//! Project configuration loaded from `.frogmon/config.toml`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use frogmon_core::prelude::*;
use frogmon_daemon::DaemonConfig;

const FROGMON_DIR: &str = ".frogmon";
const CONFIG_FILENAME: &str = "config.toml";

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub dev_server: DevServerSettings,
}

/// How the daemon is launched and how long to wait on it
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonSettings {
    /// Executable to run (looked up on PATH)
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Seconds to wait for `daemon.ready`
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Seconds to wait for a response to each request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            ready_timeout_secs: default_ready_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DaemonSettings {
    pub fn to_daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_program() -> String {
    frogmon_daemon::client::DEFAULT_PROGRAM.to_string()
}

fn default_args() -> Vec<String> {
    vec!["daemon".to_string()]
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Ports handed to `dev_server.start`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DevServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_dart_vm_service_port")]
    pub dart_vm_service_port: u16,
}

impl Default for DevServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            dart_vm_service_port: default_dart_vm_service_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_dart_vm_service_port() -> u16 {
    8181
}

/// Load settings from `.frogmon/config.toml`, falling back to defaults
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(FROGMON_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create a commented default config in `.frogmon/`. Existing files are kept.
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let frogmon_dir = project_path.join(FROGMON_DIR);

    if !frogmon_dir.exists() {
        std::fs::create_dir_all(&frogmon_dir)
            .map_err(|e| Error::config(format!("Failed to create .frogmon dir: {}", e)))?;
    }

    let config_path = frogmon_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# frogmon configuration

[daemon]
program = "dart_frog"   # Must be on PATH
args = ["daemon"]
ready_timeout_secs = 30
request_timeout_secs = 10

[dev_server]
port = 8080
dart_vm_service_port = 8181
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(())
}

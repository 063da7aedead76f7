//! Config file round trip through the public library API

use frogmon::{init_config_dir, load_settings, Settings};

#[test]
fn test_generated_config_matches_defaults() {
    let dir = tempfile::tempdir().unwrap();

    init_config_dir(dir.path()).unwrap();
    let written = std::fs::read_to_string(dir.path().join(".frogmon/config.toml")).unwrap();

    assert!(written.contains("[daemon]"));
    assert!(written.contains("[dev_server]"));
    assert_eq!(load_settings(dir.path()), Settings::default());
}

#[test]
fn test_settings_map_to_daemon_config() {
    let settings = Settings::default();
    let config = settings.daemon.to_daemon_config();

    assert_eq!(config.program, "dart_frog");
    assert_eq!(config.args, vec!["daemon"]);
}

mod common;

use common::temp_config;
use doorway::config::{Config, ConfigError};

/// Config::default() carries the documented defaults.
#[test]
fn test_config_default_values() {
    let config = Config::default();

    assert_eq!(config.server.bind_addr, "127.0.0.1:6023");
    assert_eq!(config.server.max_connections, 128);
    assert!(config.server.operators.is_empty());

    assert_eq!(config.terminal.default_rows, 24);
    assert_eq!(config.terminal.default_cols, 80);
    assert_eq!(config.terminal.default_encoding, "utf8");
    assert_eq!(config.terminal.probe_timeout_ms, 750);

    assert!(config.session.persistent);
    assert_eq!(config.session.resume_timeout_seconds, 30);
    assert_eq!(config.session.max_resumable, 3);
    assert_eq!(config.session.idle_timeout_seconds, 3600);
    assert_eq!(config.session.max_persisted, 64);

    assert_eq!(config.bus.mailbox_warn_depth, 256);
}

#[test]
fn test_config_path_ends_with_expected() {
    let path = Config::config_path();
    assert!(path.ends_with("doorway/config.toml"));
}

#[test]
fn test_missing_file_yields_default() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.server.bind_addr, Config::default().server.bind_addr);
}

/// Sections and fields left out of the file keep their defaults.
#[test]
fn test_partial_file_fills_defaults() {
    let (_dir, path) = temp_config(
        r#"
[server]
bind_addr = "0.0.0.0:2323"
operators = ["sysop"]

[session]
max_resumable = 1
"#,
    );

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.server.bind_addr, "0.0.0.0:2323");
    assert_eq!(config.server.operators, vec!["sysop".to_string()]);
    assert_eq!(config.session.max_resumable, 1);
    assert_eq!(config.session.resume_timeout_seconds, 30);
    assert_eq!(config.terminal.default_cols, 80);
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let (_dir, path) = temp_config("[server\nbind_addr = ");
    match Config::load_from(&path) {
        Err(ConfigError::ParseError { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("Expected ParseError, got {:?}", other),
    }
}

#[test]
fn test_zero_terminal_size_fails_validation() {
    let (_dir, path) = temp_config("[terminal]\ndefault_rows = 0\n");
    match Config::load_from(&path) {
        Err(ConfigError::ValidationError { message }) => {
            assert!(message.contains("non-zero"));
        }
        other => panic!("Expected ValidationError, got {:?}", other),
    }
}

#[test]
fn test_zero_timeouts_fail_validation() {
    let mut config = Config::default();
    config.terminal.probe_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.session.resume_timeout_seconds = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_empty_bind_addr_fails_validation() {
    let mut config = Config::default();
    config.server.bind_addr = "  ".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError { .. })
    ));
}

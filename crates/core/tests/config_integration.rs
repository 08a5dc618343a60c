//! auditlink.toml integration tests.
//!
//! - auditlink.toml.example parsing
//! - partial configuration (single sections) loading
//! - environment-variable precedence
//! - empty / malformed input errors

use auditlink_core::config::AuditlinkConfig;
use auditlink_core::error::{AuditlinkError, ConfigError};

// =============================================================================
// auditlink.toml.example parsing
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../auditlink.toml.example");
    let config = AuditlinkConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.general.data_dir, "/var/lib/auditlink");
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../auditlink.toml.example");
    let config = AuditlinkConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_has_correct_tailer_defaults() {
    let content = include_str!("../../../auditlink.toml.example");
    let config = AuditlinkConfig::parse(content).expect("should parse");

    assert_eq!(config.tailer.directory, "/var/log/audit");
    assert_eq!(config.tailer.live_file, "audit.log");
    assert_eq!(config.tailer.channel_capacity, 1024);
    assert_eq!(config.tailer.retry_initial_ms, 100);
    assert_eq!(config.tailer.retry_max_ms, 10_000);
}

#[test]
fn example_config_has_correct_correlation_defaults() {
    let content = include_str!("../../../auditlink.toml.example");
    let config = AuditlinkConfig::parse(content).expect("should parse");

    assert_eq!(config.correlation.maintenance_interval_secs, 2);
    assert_eq!(config.correlation.eviction_interval_secs, 60);
    assert!(!config.correlation.resume_from_start);
    assert_eq!(config.correlation.login_channel_capacity, 256);
}

#[test]
fn example_config_matches_code_defaults() {
    let content = include_str!("../../../auditlink.toml.example");
    let from_file = AuditlinkConfig::parse(content).expect("should parse");
    let from_code = AuditlinkConfig::default();

    assert_eq!(from_file.general.log_level, from_code.general.log_level);
    assert_eq!(from_file.general.log_format, from_code.general.log_format);
    assert_eq!(from_file.tailer.directory, from_code.tailer.directory);
    assert_eq!(from_file.tailer.live_file, from_code.tailer.live_file);
    assert_eq!(
        from_file.correlation.eviction_interval_secs,
        from_code.correlation.eviction_interval_secs
    );
    assert_eq!(from_file.sink.kind, from_code.sink.kind);
    assert_eq!(from_file.sink.path, from_code.sink.path);
}

// =============================================================================
// partial configuration loading
// =============================================================================

#[test]
fn partial_config_general_only() {
    let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
"#;
    let config = AuditlinkConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.log_format, "pretty");
    // remaining sections keep defaults
    assert_eq!(config.tailer.directory, "/var/log/audit");
    assert_eq!(config.sink.kind, "file");
}

#[test]
fn partial_config_tailer_only() {
    let toml = r#"
[tailer]
directory = "/srv/audit"
channel_capacity = 64
"#;
    let config = AuditlinkConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.tailer.directory, "/srv/audit");
    assert_eq!(config.tailer.channel_capacity, 64);
    assert_eq!(config.tailer.live_file, "audit.log");
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn partial_config_two_sections() {
    let toml = r#"
[general]
log_level = "warn"

[correlation]
eviction_interval_secs = 120
"#;
    let config = AuditlinkConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.correlation.eviction_interval_secs, 120);
    assert_eq!(config.correlation.maintenance_interval_secs, 2);
}

// =============================================================================
// environment-variable precedence
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[general]
log_level = "info"
"#;

    let original = std::env::var("AUDITLINK_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serialized by #[serial], no concurrent env access.
    unsafe {
        std::env::set_var("AUDITLINK_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = AuditlinkConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.general.log_level.clone();

    // SAFETY: test cleanup.
    unsafe {
        match original {
            Some(val) => std::env::set_var("AUDITLINK_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("AUDITLINK_GENERAL_LOG_LEVEL"),
        }
    }

    assert_eq!(result, "error");
}

#[test]
#[serial_test::serial]
fn env_override_numeric_field() {
    let original = std::env::var("AUDITLINK_TAILER_CHANNEL_CAPACITY").ok();
    // SAFETY: serialized by #[serial], no concurrent env access.
    unsafe {
        std::env::set_var("AUDITLINK_TAILER_CHANNEL_CAPACITY", "4096");
    }

    let mut config = AuditlinkConfig::parse("").expect("should parse");
    config.apply_env_overrides();
    let result = config.tailer.channel_capacity;

    // SAFETY: test cleanup.
    unsafe {
        match original {
            Some(val) => std::env::set_var("AUDITLINK_TAILER_CHANNEL_CAPACITY", val),
            None => std::env::remove_var("AUDITLINK_TAILER_CHANNEL_CAPACITY"),
        }
    }

    assert_eq!(result, 4096);
}

#[test]
#[serial_test::serial]
fn env_override_bool_field() {
    let original = std::env::var("AUDITLINK_CORRELATION_RESUME_FROM_START").ok();
    // SAFETY: serialized by #[serial], no concurrent env access.
    unsafe {
        std::env::set_var("AUDITLINK_CORRELATION_RESUME_FROM_START", "true");
    }

    let mut config = AuditlinkConfig::parse("").expect("should parse");
    config.apply_env_overrides();
    let result = config.correlation.resume_from_start;

    // SAFETY: test cleanup.
    unsafe {
        match original {
            Some(val) => std::env::set_var("AUDITLINK_CORRELATION_RESUME_FROM_START", val),
            None => std::env::remove_var("AUDITLINK_CORRELATION_RESUME_FROM_START"),
        }
    }

    assert!(result);
}

#[test]
#[serial_test::serial]
fn env_override_missing_var_keeps_toml_value() {
    let toml = r#"
[general]
log_level = "warn"
"#;

    // SAFETY: explicitly clear the variable under test.
    unsafe {
        std::env::remove_var("AUDITLINK_GENERAL_LOG_LEVEL");
    }

    let mut config = AuditlinkConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();

    assert_eq!(config.general.log_level, "warn");
}

// =============================================================================
// empty / malformed input errors
// =============================================================================

#[test]
fn empty_string_parses_with_defaults() {
    let config = AuditlinkConfig::parse("").expect("empty string should parse");
    config.validate().expect("should validate");
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn comments_only_parses_with_defaults() {
    let toml = r#"
# nothing but comments
# in this file
"#;
    let config = AuditlinkConfig::parse(toml).expect("comments-only should parse");
    config.validate().expect("should validate");
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn malformed_toml_returns_parse_error() {
    let result = AuditlinkConfig::parse("[invalid toml");
    assert!(matches!(
        result.unwrap_err(),
        AuditlinkError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn wrong_type_for_numeric_field() {
    let toml = r#"
[tailer]
channel_capacity = "lots"
"#;
    let result = AuditlinkConfig::parse(toml);
    assert!(matches!(
        result.unwrap_err(),
        AuditlinkError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let result = AuditlinkConfig::from_file("/tmp/auditlink_test_nonexistent_12345.toml").await;
    assert!(matches!(
        result.unwrap_err(),
        AuditlinkError::Config(ConfigError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn load_config_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("auditlink.toml");
    tokio::fs::write(
        &path,
        "[general]\nlog_level = \"debug\"\n\n[sink]\nkind = \"stdout\"\n",
    )
    .await
    .expect("write config");

    let config = AuditlinkConfig::from_file(&path).await.expect("should load");
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.sink.kind, "stdout");
}

// =============================================================================
// serialization round-trip
// =============================================================================

#[test]
fn serialize_and_reparse_roundtrip() {
    let original = AuditlinkConfig::default();
    let toml_str = toml::to_string_pretty(&original).expect("should serialize");
    let parsed = AuditlinkConfig::parse(&toml_str).expect("should reparse");
    parsed.validate().expect("reparsed should validate");

    assert_eq!(original.general.log_level, parsed.general.log_level);
    assert_eq!(original.tailer.directory, parsed.tailer.directory);
    assert_eq!(
        original.correlation.eviction_interval_secs,
        parsed.correlation.eviction_interval_secs
    );
    assert_eq!(original.sink.path, parsed.sink.path);
}

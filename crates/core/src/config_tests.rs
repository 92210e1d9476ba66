// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn defaults_are_valid() {
    let config = LatchConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.endpoints, vec!["localhost:2379".to_string()]);
    assert_eq!(config.dial_timeout, Duration::from_secs(5));
    assert_eq!(config.prefix, "/my-lock/");
}

#[test]
fn parses_human_durations() {
    let config = LatchConfig::from_toml(
        r#"
        endpoints = ["10.0.0.1:2379", "10.0.0.2:2379"]
        dial_timeout = "2s"
        lease_ttl = "30s"
        keep_alive_interval = "5s"
        prefix = "/jobs/"

        [retry]
        max_attempts = 5
        initial_backoff = "50ms"
        "#,
    )
    .unwrap();

    assert_eq!(config.endpoints.len(), 2);
    assert_eq!(config.dial_timeout, Duration::from_secs(2));
    assert_eq!(config.lease_ttl, Duration::from_secs(30));
    assert_eq!(config.keep_alive_interval, Some(Duration::from_secs(5)));
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_backoff, Duration::from_millis(50));
    // unspecified fields keep defaults
    assert_eq!(config.retry.max_backoff, Duration::from_secs(2));
    assert_eq!(config.watch_poll_interval, Duration::from_secs(1));
}

#[test]
fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latch.toml");
    std::fs::write(&path, "lease_ttl = \"15s\"\n").unwrap();

    let config = LatchConfig::load(&path).unwrap();
    assert_eq!(config.lease_ttl, Duration::from_secs(15));
}

#[test]
fn load_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");

    let err = LatchConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { path: p, .. } if p == path));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = LatchConfig::from_toml("lease_ttl = \"soon\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[parameterized(
    no_endpoints = { "endpoints = []" },
    sub_second_ttl = { "lease_ttl = \"500ms\"" },
    keep_alive_too_slow = { "lease_ttl = \"10s\"\nkeep_alive_interval = \"5s\"" },
    keep_alive_zero = { "keep_alive_interval = \"0s\"" },
    bare_slash_prefix = { "prefix = \"/\"" },
)]
fn rejects_invalid(content: &str) {
    let err = LatchConfig::from_toml(content).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn session_config_uses_renewal_budget() {
    let config = LatchConfig {
        max_renewal_attempts: 7,
        lease_ttl: Duration::from_secs(20),
        ..LatchConfig::default()
    };

    let session = config.session_config();
    assert_eq!(session.ttl, Duration::from_secs(20));
    assert_eq!(session.renewal.max_attempts, 7);
}

#[test]
fn round_trips_through_toml() {
    let config = LatchConfig {
        keep_alive_interval: Some(Duration::from_secs(3)),
        ..LatchConfig::default()
    };
    let text = toml::to_string(&config).unwrap();
    assert_eq!(LatchConfig::from_toml(&text).unwrap(), config);
}

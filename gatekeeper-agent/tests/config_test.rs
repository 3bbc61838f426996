//! Argument parsing and validation

use std::time::Duration;

use clap::Parser;
use gatekeeper_agent::{Args, ConfigError};

const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

fn parse(extra: &[&str]) -> Args {
    let mut argv = vec![
        "gatekeeper-agent",
        "--keymaster-url",
        "http://keymaster.local/doors/keymaster/",
        "--encryption-key",
        KEY,
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
}

#[test]
fn test_defaults() {
    let args = parse(&[]);

    assert_eq!(args.message_ttl_secs, 600);
    assert_eq!(args.request_timeout_ms, 30_000);
    assert_eq!(args.door_timeout_ms, 15_000);
    assert_eq!(args.sync_interval_secs, 300);
    assert_eq!(args.event_log_count, 100);
    assert!(!args.check_in);
    assert!(!args.once);
    assert_eq!(args.log_level, "info");
    assert!(args.validate().is_ok());
}

#[test]
fn test_derived_settings() {
    let args = parse(&["--door-timeout-ms", "250", "--sync-interval-secs", "60", "--check-in"]);

    assert_eq!(args.gatekeeper_config().door_timeout, Duration::from_millis(250));
    assert_eq!(args.sync_interval(), Duration::from_secs(60));
    assert!(args.cycle_options().check_in);

    let channel = args.channel_config();
    assert_eq!(channel.ttl, Duration::from_secs(600));
    assert_eq!(channel.keymaster_url.as_deref(), Some("http://keymaster.local/doors/keymaster/"));
}

#[test]
fn test_missing_key_rejected() {
    let args = Args::try_parse_from(["gatekeeper-agent", "--keymaster-url", "http://keymaster.local/"]).unwrap();
    assert_eq!(args.validate(), Err(ConfigError::Missing("ENCRYPTION_KEY")));
}

#[test]
fn test_zero_values_rejected() {
    let args = parse(&["--sync-interval-secs", "0"]);
    assert_eq!(args.validate(), Err(ConfigError::Zero("SYNC_INTERVAL_SECS")));

    let args = parse(&["--event-log-count", "0"]);
    assert_eq!(args.validate(), Err(ConfigError::Zero("EVENT_LOG_COUNT")));
}

#[test]
fn test_non_numeric_value_is_parse_error() {
    let result = Args::try_parse_from(["gatekeeper-agent", "--door-timeout-ms", "soon"]);
    assert!(result.is_err());
}

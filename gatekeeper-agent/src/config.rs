//! Configuration for the gatekeeper agent
//!
//! CLI arguments and environment variable handling using clap.

use std::time::Duration;

use clap::Parser;
use gatekeeper::{ChannelConfig, GatekeeperConfig};

use crate::cycle::CycleOptions;

/// Gatekeeper agent - keeps a site's doors in sync with the keymaster
#[derive(Parser, Debug, Clone)]
#[command(name = "gatekeeper-agent")]
#[command(about = "Synchronizes local door controllers with a remote keymaster")]
pub struct Args {
    /// Keymaster endpoint URL (e.g. https://example.org/doors/keymaster/)
    #[arg(long, env = "KEYMASTER_URL")]
    pub keymaster_url: Option<String>,

    /// Shared channel key: 32 bytes, URL-safe base64
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Maximum age of an accepted message, in seconds
    #[arg(long, env = "MESSAGE_TTL_SECS", default_value = "600")]
    pub message_ttl_secs: u64,

    /// Keymaster request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Per-door operation timeout in milliseconds
    #[arg(long, env = "DOOR_TIMEOUT_MS", default_value = "15000")]
    pub door_timeout_ms: u64,

    /// Seconds between the start of two sync cycles
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "300")]
    pub sync_interval_secs: u64,

    /// Events pulled from each door per push
    #[arg(long, env = "EVENT_LOG_COUNT", default_value = "100")]
    pub event_log_count: usize,

    /// Only pull door codes when the keymaster reports new data
    #[arg(long, env = "CHECK_IN", default_value = "false")]
    pub check_in: bool,

    /// Run a single cycle and exit
    #[arg(long, env = "ONCE", default_value = "false")]
    pub once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Print a new channel key and exit
    #[arg(long)]
    pub generate_key: bool,
}

/// A setting that cannot work, caught before startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keymaster_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Missing("KEYMASTER_URL"));
        }
        if self.encryption_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Missing("ENCRYPTION_KEY"));
        }

        let positive = [
            ("MESSAGE_TTL_SECS", self.message_ttl_secs),
            ("REQUEST_TIMEOUT_MS", self.request_timeout_ms),
            ("DOOR_TIMEOUT_MS", self.door_timeout_ms),
            ("SYNC_INTERVAL_SECS", self.sync_interval_secs),
            ("EVENT_LOG_COUNT", self.event_log_count as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }

        Ok(())
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            encryption_key: self.encryption_key.clone(),
            keymaster_url: self.keymaster_url.clone(),
            ttl: Duration::from_secs(self.message_ttl_secs),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn gatekeeper_config(&self) -> GatekeeperConfig {
        GatekeeperConfig {
            door_timeout: Duration::from_millis(self.door_timeout_ms),
        }
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            check_in: self.check_in,
            event_log_count: self.event_log_count,
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

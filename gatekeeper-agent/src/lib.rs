//! Gatekeeper agent - runs sync cycles for one site on a schedule.

pub mod config;
pub mod cycle;

pub use config::{Args, ConfigError};
pub use cycle::{CycleOptions, CycleReport, SyncAgent};

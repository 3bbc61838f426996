//! Door controller abstraction.
//!
//! Every backend (HID, Maypi, the no-op test controller, the in-memory
//! simulator) implements [`DoorController`]. Backends are chosen at
//! configuration time by door type through the [`ControllerRegistry`].
//!
//! ## Modules
//!
//! - `cardholders` - dual-keyed cardholder cache every backend carries
//! - `codes` - desired door codes, change lists, and the diff between them
//! - `memory` - simulated device with real diff/apply semantics
//! - `noop` - reference no-op backend (door type `test`)
//! - `registry` - door type → controller constructor

pub mod cardholders;
pub mod codes;
pub mod memory;
pub mod noop;
pub mod registry;

pub use cardholders::{Cardholder, CardholderCache};
pub use codes::{plan_changes, Change, DoorCode};
pub use memory::{DeviceState, MemoryDoorController, SimulatedDevice};
pub use noop::TestDoorController;
pub use registry::{ControllerFactory, ControllerRegistry};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::DoorEventType;

/// Error types for door controller operations.
#[derive(Debug, thiserror::Error)]
pub enum DoorError {
    /// The device could not be reached
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The device answered but refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A cardholder record was missing required fields
    #[error("Invalid cardholder record: {0}")]
    InvalidRecord(String),

    /// The operation did not finish within the per-door bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Where a door lives and how to log into it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorEndpoint {
    pub ip_address: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DoorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoorEndpoint")
            .field("ip_address", &self.ip_address)
            .field("username", &self.username)
            .field("password", &"..")
            .finish()
    }
}

/// One entry of the keymaster's door configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorDescriptor {
    pub name: String,
    pub door_type: String,
    #[serde(flatten)]
    pub endpoint: DoorEndpoint,
}

/// An event recorded by door hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: DoorEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardholder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DoorEvent {
    pub fn new(timestamp: DateTime<Utc>, event_type: DoorEventType) -> Self {
        Self {
            timestamp,
            event_type,
            cardholder_id: None,
            username: None,
            description: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_cardholder_id(mut self, cardholder_id: impl Into<String>) -> Self {
        self.cardholder_id = Some(cardholder_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Capability set of one physical door controller.
///
/// Operations that touch the device take `&mut self`; a controller is never
/// driven by two callers at once, so diff and apply on one device cannot
/// interleave.
#[async_trait]
pub trait DoorController: Send + Sync {
    /// The controller's cardholder cache.
    fn cardholders(&self) -> &CardholderCache;

    /// Check that the device answers.
    async fn test_connection(&self) -> bool;

    /// Push the current time to the device.
    async fn set_time(&mut self) -> Result<(), DoorError>;

    /// Refresh the cardholder cache from the device.
    async fn load_cardholders(&mut self) -> Result<(), DoorError>;

    /// Refresh the cardholder cache, including credentials, from the device.
    async fn load_credentials(&mut self) -> Result<(), DoorError>;

    /// Remove every access code stored on the device.
    async fn clear_door_codes(&mut self) -> Result<(), DoorError>;

    /// Compute the changes needed to make the device match `door_codes`.
    ///
    /// Never mutates the device. With `load_credentials` the cache is refreshed
    /// first; two calls with the same input and no `process_changes` in between
    /// return the same list.
    async fn process_door_codes(
        &mut self,
        door_codes: &[DoorCode],
        load_credentials: bool,
    ) -> Result<Vec<Change>, DoorError>;

    /// Apply a change list. Applying the same list again is a no-op.
    async fn process_changes(&mut self, changes: &[Change]) -> Result<(), DoorError>;

    /// The `count` most recent events, newest first.
    async fn pull_events(&self, count: usize) -> Result<Vec<DoorEvent>, DoorError>;
}

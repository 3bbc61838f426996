//! Protocol vocabulary shared with the keymaster.
//!
//! Tags travel as the encrypted plaintext of an envelope's `message` field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Handshake question sent by the gatekeeper.
pub const TEST_QUESTION: &str = "Are you the Keymaster?";
/// The only acceptable reply to [`TEST_QUESTION`].
pub const TEST_RESPONSE: &str = "Are you the Gatekeeper?";
pub const PULL_CONFIGURATION: &str = "pull_configuration";
pub const CHECK_IN: &str = "check_in";
pub const PULL_DOOR_CODES: &str = "pull_door_codes";
pub const PUSH_EVENT_LOGS: &str = "push_event_logs";
pub const NEW_DATA: &str = "new_data";
pub const NO_NEW_DATA: &str = "no_new_data";
pub const MARK_SUCCESS: &str = "mark_success";
/// Sentinel the keymaster returns when it accepted a push.
pub const SUCCESS_RESPONSE: &str = "OK";

/// Kind of controller behind a door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorType {
    Hid,
    Maypi,
    Test,
}

impl DoorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorType::Hid => "hid",
            DoorType::Maypi => "maypi",
            DoorType::Test => "test",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DoorType::Hid => "Hid Controller",
            DoorType::Maypi => "Maypi Controller",
            DoorType::Test => "Test Controller",
        }
    }
}

impl fmt::Display for DoorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a door type tag is not one we know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown door type: {0}")]
pub struct UnknownDoorType(pub String);

impl FromStr for DoorType {
    type Err = UnknownDoorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hid" => Ok(DoorType::Hid),
            "maypi" => Ok(DoorType::Maypi),
            "test" => Ok(DoorType::Test),
            other => Err(UnknownDoorType(other.to_string())),
        }
    }
}

/// Event reported by door hardware.
///
/// Serialized with the numeric string codes the keymaster stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoorEventType {
    #[serde(rename = "0")]
    Unknown,
    #[serde(rename = "1")]
    Unrecognized,
    #[serde(rename = "2")]
    Granted,
    #[serde(rename = "3")]
    Denied,
    #[serde(rename = "4")]
    Locked,
    #[serde(rename = "5")]
    Unlocked,
}

impl DoorEventType {
    pub fn code(&self) -> &'static str {
        match self {
            DoorEventType::Unknown => "0",
            DoorEventType::Unrecognized => "1",
            DoorEventType::Granted => "2",
            DoorEventType::Denied => "3",
            DoorEventType::Locked => "4",
            DoorEventType::Unlocked => "5",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DoorEventType::Unknown => "Unknown Command",
            DoorEventType::Unrecognized => "Unrecognized Card",
            DoorEventType::Granted => "Access Granted",
            DoorEventType::Denied => "Access Denied",
            DoorEventType::Locked => "Door Locked",
            DoorEventType::Unlocked => "Door Unlocked",
        }
    }
}

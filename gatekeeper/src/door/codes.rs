//! Door codes and change lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One access code the keymaster wants present on the doors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorCode {
    pub username: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl DoorCode {
    pub fn new(username: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            code: code.into(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self.last_name = Some(last_name.into());
        self
    }
}

/// A pending modification to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    /// A user with no code on the device gets one
    Add { code: DoorCode },
    /// A user's code or name differs from the desired one
    Update { code: DoorCode },
    /// A user no longer in the desired set loses their code
    Remove { username: String },
}

impl Change {
    pub fn username(&self) -> &str {
        match self {
            Change::Add { code } | Change::Update { code } => &code.username,
            Change::Remove { username } => username,
        }
    }
}

/// Diff the desired codes against what a device currently holds.
///
/// `current` is keyed by username. Removals come first, then additions and
/// updates, each in username order, so the same inputs always give the same
/// list. When `desired` names a user twice the last entry wins.
pub fn plan_changes(desired: &[DoorCode], current: &BTreeMap<String, DoorCode>) -> Vec<Change> {
    let wanted: BTreeMap<&str, &DoorCode> = desired
        .iter()
        .map(|code| (code.username.as_str(), code))
        .collect();

    let mut changes: Vec<Change> = current
        .keys()
        .filter(|username| !wanted.contains_key(username.as_str()))
        .map(|username| Change::Remove {
            username: username.clone(),
        })
        .collect();

    for (username, code) in wanted {
        match current.get(username) {
            None => changes.push(Change::Add { code: code.clone() }),
            Some(existing) if existing != code => changes.push(Change::Update { code: code.clone() }),
            Some(_) => {}
        }
    }

    changes
}

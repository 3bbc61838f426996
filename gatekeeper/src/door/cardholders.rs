//! Cardholder cache.
//!
//! Controllers keep the cardholders last read from their device here. A
//! record is stored once and indexed two ways, by cardholder ID and by
//! username, so both lookups always see the same record.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::DoorError;

const ID_FIELD: &str = "cardholderID";
const USERNAME_FIELD: &str = "username";

/// One cardholder as read from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Cardholder {
    id: String,
    username: Option<String>,
    record: Map<String, Value>,
}

impl Cardholder {
    /// Build a cardholder from a raw device record.
    ///
    /// `cardholderID` is required and may be a string or a number.
    /// `username` is optional.
    pub fn from_record(record: Map<String, Value>) -> Result<Self, DoorError> {
        let id = match record.get(ID_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(DoorError::InvalidRecord(format!("missing {ID_FIELD}"))),
        };
        let username = record
            .get(USERNAME_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self { id, username, record })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// A field of the raw record, as a string if it is one.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.record.get(field).and_then(Value::as_str)
    }

    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }
}

/// Cardholder records indexed by ID and by username.
#[derive(Debug, Default, Clone)]
pub struct CardholderCache {
    records: Vec<Cardholder>,
    by_id: HashMap<String, usize>,
    by_username: HashMap<String, usize>,
}

impl CardholderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cardholder, replacing any record with the same ID.
    pub fn save(&mut self, cardholder: Cardholder) {
        match self.by_id.get(cardholder.id()).copied() {
            Some(index) => {
                if let Some(old) = self.records[index].username() {
                    if self.by_username.get(old) == Some(&index) {
                        self.by_username.remove(old);
                    }
                }
                if let Some(username) = cardholder.username() {
                    self.by_username.insert(username.to_string(), index);
                }
                self.records[index] = cardholder;
            }
            None => {
                let index = self.records.len();
                self.by_id.insert(cardholder.id().to_string(), index);
                if let Some(username) = cardholder.username() {
                    self.by_username.insert(username.to_string(), index);
                }
                self.records.push(cardholder);
            }
        }
    }

    /// Parse a raw record and store it.
    pub fn save_record(&mut self, record: Map<String, Value>) -> Result<(), DoorError> {
        self.save(Cardholder::from_record(record)?);
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Cardholder> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    pub fn get_by_username(&self, username: &str) -> Option<&Cardholder> {
        self.by_username.get(username).map(|&i| &self.records[i])
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_id.clear();
        self.by_username.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cardholder> {
        self.records.iter()
    }
}

//! Simulated door device.
//!
//! [`SimulatedDevice`] is the "hardware": codes keyed by username, an event
//! log, a clock, and an online flag. [`MemoryDoorController`] drives it
//! through the same contract a real backend implements, so reconciliation can
//! be exercised end to end without a door on the bench.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    plan_changes, CardholderCache, Change, DoorCode, DoorController, DoorEndpoint, DoorError, DoorEvent,
};

/// One user stored on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCardholder {
    pub cardholder_id: String,
    pub code: DoorCode,
}

/// Everything the simulated device holds.
#[derive(Debug)]
pub struct DeviceState {
    pub codes: BTreeMap<String, DeviceCardholder>,
    pub events: Vec<DoorEvent>,
    pub clock: Option<DateTime<Utc>>,
    pub online: bool,
    /// Added to every operation, to simulate a slow device.
    pub latency: Duration,
    next_id: u64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            codes: BTreeMap::new(),
            events: Vec::new(),
            clock: None,
            online: true,
            latency: Duration::ZERO,
            next_id: 1,
        }
    }
}

impl DeviceState {
    fn upsert(&mut self, code: &DoorCode) {
        match self.codes.get_mut(&code.username) {
            Some(existing) => existing.code = code.clone(),
            None => {
                let cardholder_id = self.next_id.to_string();
                self.next_id += 1;
                self.codes.insert(
                    code.username.clone(),
                    DeviceCardholder {
                        cardholder_id,
                        code: code.clone(),
                    },
                );
            }
        }
    }
}

/// Shared handle to a simulated device.
///
/// Clones point at the same device, so a test can keep one handle while the
/// controller owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the device state for inspection or direct manipulation.
    pub async fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().await
    }

    /// Put codes on the device as if entered at the panel.
    pub async fn seed(&self, codes: &[DoorCode]) {
        let mut state = self.state.lock().await;
        for code in codes {
            state.upsert(code);
        }
    }

    /// Append an event to the device log.
    pub async fn record_event(&self, event: DoorEvent) {
        self.state.lock().await.events.push(event);
    }

    pub async fn set_online(&self, online: bool) {
        self.state.lock().await.online = online;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Usernames currently on the device, sorted.
    pub async fn usernames(&self) -> Vec<String> {
        self.state.lock().await.codes.keys().cloned().collect()
    }
}

/// Controller backed by a [`SimulatedDevice`].
pub struct MemoryDoorController {
    endpoint: DoorEndpoint,
    device: SimulatedDevice,
    cardholders: CardholderCache,
}

impl MemoryDoorController {
    pub fn new(endpoint: DoorEndpoint, device: SimulatedDevice) -> Self {
        Self {
            endpoint,
            device,
            cardholders: CardholderCache::new(),
        }
    }

    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }

    /// Lock the device, failing if it is offline.
    async fn connect(&self) -> Result<MutexGuard<'_, DeviceState>, DoorError> {
        let latency = self.device.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.device.state.lock().await;
        if !state.online {
            return Err(DoorError::Connection(format!(
                "{} is not responding",
                self.endpoint.ip_address
            )));
        }
        Ok(state)
    }

    async fn refresh_cache(&mut self, with_codes: bool) -> Result<(), DoorError> {
        let records: Vec<Map<String, Value>> = {
            let state = self.connect().await?;
            state
                .codes
                .values()
                .map(|holder| cardholder_record(holder, with_codes))
                .collect()
        };

        self.cardholders.clear();
        for record in records {
            self.cardholders.save_record(record)?;
        }
        Ok(())
    }

    /// Codes currently in the cache, keyed by username.
    fn cached_codes(&self) -> BTreeMap<String, DoorCode> {
        self.cardholders
            .iter()
            .filter_map(|holder| {
                let username = holder.username()?;
                let code = holder.get("code")?;
                Some((
                    username.to_string(),
                    DoorCode {
                        username: username.to_string(),
                        code: code.to_string(),
                        first_name: holder.get("forename").map(str::to_string),
                        last_name: holder.get("surname").map(str::to_string),
                    },
                ))
            })
            .collect()
    }
}

fn cardholder_record(holder: &DeviceCardholder, with_code: bool) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("cardholderID".to_string(), json!(holder.cardholder_id));
    record.insert("username".to_string(), json!(holder.code.username));
    if let Some(first_name) = &holder.code.first_name {
        record.insert("forename".to_string(), json!(first_name));
    }
    if let Some(last_name) = &holder.code.last_name {
        record.insert("surname".to_string(), json!(last_name));
    }
    if with_code {
        record.insert("code".to_string(), json!(holder.code.code));
    }
    record
}

#[async_trait]
impl DoorController for MemoryDoorController {
    fn cardholders(&self) -> &CardholderCache {
        &self.cardholders
    }

    async fn test_connection(&self) -> bool {
        self.connect().await.is_ok()
    }

    async fn set_time(&mut self) -> Result<(), DoorError> {
        let mut state = self.connect().await?;
        state.clock = Some(Utc::now());
        Ok(())
    }

    async fn load_cardholders(&mut self) -> Result<(), DoorError> {
        self.refresh_cache(false).await
    }

    async fn load_credentials(&mut self) -> Result<(), DoorError> {
        self.refresh_cache(true).await
    }

    async fn clear_door_codes(&mut self) -> Result<(), DoorError> {
        self.connect().await?.codes.clear();
        self.cardholders.clear();
        Ok(())
    }

    async fn process_door_codes(
        &mut self,
        door_codes: &[DoorCode],
        load_credentials: bool,
    ) -> Result<Vec<Change>, DoorError> {
        if load_credentials {
            self.load_credentials().await?;
        }
        Ok(plan_changes(door_codes, &self.cached_codes()))
    }

    async fn process_changes(&mut self, changes: &[Change]) -> Result<(), DoorError> {
        {
            let mut state = self.connect().await?;
            for change in changes {
                match change {
                    Change::Add { code } | Change::Update { code } => state.upsert(code),
                    Change::Remove { username } => {
                        state.codes.remove(username);
                    }
                }
            }
        }
        debug!(ip = %self.endpoint.ip_address, changes = changes.len(), "Applied changes");
        self.load_credentials().await
    }

    async fn pull_events(&self, count: usize) -> Result<Vec<DoorEvent>, DoorError> {
        let state = self.connect().await?;
        Ok(state.events.iter().rev().take(count).cloned().collect())
    }
}

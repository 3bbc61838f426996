//! Gatekeeper - the sync orchestrator.
//!
//! Owns the keymaster channel and the configured doors, and drives each step
//! of a sync cycle across every door.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, info_span, instrument, Span};

use crate::channel::{Decrypted, SecureChannel};
use crate::door::{Change, ControllerRegistry, DoorCode, DoorController, DoorDescriptor, DoorEndpoint, DoorError, DoorEvent};
use crate::error::{ConfigurationError, GatekeeperError, Result};
use crate::messages::{self, DoorType};

/// Default bound on any single per-door call.
pub const DEFAULT_DOOR_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of events pulled from each door.
pub const DEFAULT_EVENT_LOG_COUNT: usize = 100;

/// Configuration for the Gatekeeper.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    /// Upper bound on each per-door controller call
    pub door_timeout: Duration,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            door_timeout: DEFAULT_DOOR_TIMEOUT,
        }
    }
}

/// Static description of one configured door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorConfig {
    pub name: String,
    pub door_type: DoorType,
    pub endpoint: DoorEndpoint,
}

/// A configured door and its controller.
pub struct Door {
    config: DoorConfig,
    controller: Box<dyn DoorController>,
}

impl Door {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn door_type(&self) -> DoorType {
        self.config.door_type
    }

    pub fn config(&self) -> &DoorConfig {
        &self.config
    }

    pub fn controller(&self) -> &dyn DoorController {
        self.controller.as_ref()
    }
}

impl std::fmt::Debug for Door {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Door")
            .field("config", &self.config)
            .field("cardholders", &self.controller.cardholders().len())
            .finish()
    }
}

/// Answer to a `check_in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    /// The keymaster has changes waiting
    NewData,
    /// Nothing changed since the last `mark_success`
    NoNewData,
}

/// Controller call fanned out to every door.
#[derive(Debug, Clone, Copy)]
enum DoorOp {
    SetTime,
    LoadCredentials,
    ClearCodes,
}

impl DoorOp {
    fn name(self) -> &'static str {
        match self {
            DoorOp::SetTime => "set_time",
            DoorOp::LoadCredentials => "load_credentials",
            DoorOp::ClearCodes => "clear_door_codes",
        }
    }
}

/// Synchronizes local door controllers with the keymaster.
///
/// Starts unconfigured. Only a successful [`configure_doors`](Self::configure_doors)
/// installs doors; every door-scoped call before that fails with a state
/// error.
pub struct Gatekeeper {
    channel: SecureChannel,
    registry: ControllerRegistry,
    config: GatekeeperConfig,
    doors: Option<BTreeMap<String, Door>>,
    span: Span,
}

impl Gatekeeper {
    /// Create an unconfigured gatekeeper.
    pub fn new(channel: SecureChannel, registry: ControllerRegistry) -> Self {
        Self {
            channel,
            registry,
            config: GatekeeperConfig::default(),
            doors: None,
            span: info_span!("gatekeeper"),
        }
    }

    /// Create with configuration.
    pub fn with_config(mut self, config: GatekeeperConfig) -> Self {
        self.config = config;
        self
    }

    /// Log every operation under `span` instead of the default `gatekeeper` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }

    pub fn is_configured(&self) -> bool {
        self.doors.is_some()
    }

    /// Confirm the other end of the channel is the keymaster.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn test_keymaster_connection(&self) -> Result<()> {
        let reply = self.channel.send(messages::TEST_QUESTION, None).await?;
        if reply.message != messages::TEST_RESPONSE {
            return Err(GatekeeperError::Handshake { reply: reply.message });
        }
        info!(endpoint = self.channel.endpoint().unwrap_or_default(), "Keymaster connection verified");
        Ok(())
    }

    /// Pull the door configuration and rebuild every controller.
    ///
    /// The new doors are built and loaded aside and only replace the current
    /// set once every one of them succeeded; on any error the previous
    /// configuration (or lack of one) stays in place.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn configure_doors(&mut self) -> Result<()> {
        info!("Pulling door configuration");
        let reply = self.channel.send(messages::PULL_CONFIGURATION, None).await?;
        let descriptors: Vec<DoorDescriptor> = reply_json(messages::PULL_CONFIGURATION, &reply)?;
        if descriptors.is_empty() {
            return Err(ConfigurationError::NoDoors.into());
        }

        let mut scratch: BTreeMap<String, Door> = BTreeMap::new();
        for descriptor in descriptors {
            if scratch.contains_key(&descriptor.name) {
                return Err(ConfigurationError::DuplicateDoor(descriptor.name).into());
            }
            let (door_type, controller) = self.registry.build(&descriptor)?;
            debug!(door = %descriptor.name, door_type = %door_type, "Built controller");

            let config = DoorConfig {
                name: descriptor.name,
                door_type,
                endpoint: descriptor.endpoint,
            };
            scratch.insert(config.name.clone(), Door { config, controller });
        }

        run_on_doors(&mut scratch, DoorOp::LoadCredentials, self.config.door_timeout).await?;

        info!(doors = scratch.len(), "Doors configured");
        self.doors = Some(scratch);
        Ok(())
    }

    /// All configured doors, by name.
    pub fn get_doors(&self) -> Result<&BTreeMap<String, Door>> {
        self.doors
            .as_ref()
            .ok_or(GatekeeperError::State { operation: "get_doors" })
    }

    /// One configured door.
    pub fn get_door(&self, name: &str) -> Result<&Door> {
        self.get_doors()?
            .get(name)
            .ok_or_else(|| GatekeeperError::DoorNotFound(name.to_string()))
    }

    /// Set every door's clock.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn sync_clocks(&mut self) -> Result<()> {
        info!("Syncing door clocks");
        let timeout = self.config.door_timeout;
        run_on_doors(self.doors_mut("sync_clocks")?, DoorOp::SetTime, timeout).await
    }

    /// Reload credentials from every door.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn load_data(&mut self) -> Result<()> {
        let timeout = self.config.door_timeout;
        run_on_doors(self.doors_mut("load_data")?, DoorOp::LoadCredentials, timeout).await
    }

    /// Remove every code from every door.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn clear_all_codes(&mut self) -> Result<()> {
        info!("Clearing all door codes");
        let timeout = self.config.door_timeout;
        run_on_doors(self.doors_mut("clear_all_codes")?, DoorOp::ClearCodes, timeout).await
    }

    /// Pull the desired codes and reconcile every door against them.
    ///
    /// Returns the change list applied to each door.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn pull_door_codes(&mut self) -> Result<BTreeMap<String, Vec<Change>>> {
        // Checked before the exchange so an unconfigured call has no remote effect.
        self.doors_mut("pull_door_codes")?;

        info!("Pulling door codes");
        let reply = self.channel.send(messages::PULL_DOOR_CODES, None).await?;
        let codes: Vec<DoorCode> = reply_json(messages::PULL_DOOR_CODES, &reply)?;
        debug!(codes = codes.len(), "Received door codes");

        let timeout = self.config.door_timeout;
        let codes = &codes;
        let doors = self.doors_mut("pull_door_codes")?;
        let applied = try_join_all(doors.iter_mut().map(|(name, door)| async move {
            let controller = door.controller.as_mut();
            let changes = bounded(
                name,
                "process_door_codes",
                timeout,
                controller.process_door_codes(codes, true),
            )
            .await?;
            debug!(door = %name, changes = changes.len(), "Applying changes");
            bounded(name, "process_changes", timeout, controller.process_changes(&changes)).await?;
            Ok::<_, GatekeeperError>((name.clone(), changes))
        }))
        .await?;

        Ok(applied.into_iter().collect())
    }

    /// Pull the `count` most recent events from every door.
    ///
    /// Every configured door appears in the result, with an empty list when
    /// it has no events.
    #[instrument(parent = &self.span, skip_all, fields(count = count))]
    pub async fn pull_event_logs(&self, count: usize) -> Result<BTreeMap<String, Vec<DoorEvent>>> {
        info!("Pulling event logs");
        let timeout = self.config.door_timeout;
        let doors = self
            .doors
            .as_ref()
            .ok_or(GatekeeperError::State { operation: "pull_event_logs" })?;

        let logs = try_join_all(doors.iter().map(|(name, door)| async move {
            let events = bounded(name, "pull_events", timeout, door.controller.pull_events(count)).await?;
            debug!(door = %name, events = events.len(), "Pulled events");
            Ok::<_, GatekeeperError>((name.clone(), events))
        }))
        .await?;

        Ok(logs.into_iter().collect())
    }

    /// Send the recent events of every door to the keymaster.
    ///
    /// Only an `OK` reply counts as delivered, and only then are the doors
    /// re-configured. Events may be delivered more than once.
    #[instrument(parent = &self.span, skip_all, fields(count = count))]
    pub async fn push_event_logs(&mut self, count: usize) -> Result<()> {
        let logs = self.pull_event_logs(count).await?;
        let payload = serde_json::to_value(&logs)
            .map_err(|e| GatekeeperError::protocol(format!("Could not serialize event logs: {e}")))?;

        info!(doors = logs.len(), "Pushing event logs to keymaster");
        let reply = self
            .channel
            .send(messages::PUSH_EVENT_LOGS, Some(&payload))
            .await?;
        if reply.message != messages::SUCCESS_RESPONSE {
            return Err(GatekeeperError::Sync {
                tag: messages::PUSH_EVENT_LOGS.to_string(),
                reply: reply.message,
            });
        }

        self.configure_doors().await
    }

    /// Ask the keymaster whether anything changed since the last success.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn check_in(&self) -> Result<CheckIn> {
        let reply = self.channel.send(messages::CHECK_IN, None).await?;
        let status = match reply.message.as_str() {
            messages::NEW_DATA => CheckIn::NewData,
            messages::NO_NEW_DATA => CheckIn::NoNewData,
            other => {
                return Err(GatekeeperError::protocol(format!(
                    "Unexpected check-in reply {other:?}"
                )))
            }
        };
        debug!(?status, "Checked in");
        Ok(status)
    }

    /// Tell the keymaster the pending data was applied.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn mark_success(&self) -> Result<()> {
        let reply = self.channel.send(messages::MARK_SUCCESS, None).await?;
        if reply.message != messages::SUCCESS_RESPONSE {
            return Err(GatekeeperError::Sync {
                tag: messages::MARK_SUCCESS.to_string(),
                reply: reply.message,
            });
        }
        Ok(())
    }

    fn doors_mut(&mut self, operation: &'static str) -> Result<&mut BTreeMap<String, Door>> {
        self.doors.as_mut().ok_or(GatekeeperError::State { operation })
    }
}

/// Run one controller call on every door concurrently; the first failure wins.
async fn run_on_doors(doors: &mut BTreeMap<String, Door>, op: DoorOp, timeout: Duration) -> Result<()> {
    try_join_all(doors.iter_mut().map(|(name, door)| {
        let controller = door.controller.as_mut();
        let call = match op {
            DoorOp::SetTime => controller.set_time(),
            DoorOp::LoadCredentials => controller.load_credentials(),
            DoorOp::ClearCodes => controller.clear_door_codes(),
        };
        bounded(name, op.name(), timeout, call)
    }))
    .await?;
    Ok(())
}

/// Await a controller call under the per-door timeout.
async fn bounded<T>(
    door: &str,
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = std::result::Result<T, DoorError>>,
) -> Result<T> {
    let source = match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => e,
        Err(_) => DoorError::Timeout(limit),
    };
    Err(GatekeeperError::Door {
        door: door.to_string(),
        operation,
        source,
    })
}

/// Parse the JSON body of a reply: the `data` field when present, otherwise
/// the decrypted message itself.
fn reply_json<T: DeserializeOwned>(tag: &str, reply: &Decrypted) -> Result<T> {
    let parsed = match &reply.data {
        Some(data) => serde_json::from_value(data.clone()),
        None => serde_json::from_str::<Value>(&reply.message).and_then(serde_json::from_value),
    };
    parsed.map_err(|e| GatekeeperError::protocol(format!("Invalid JSON in reply to '{tag}': {e}")))
}

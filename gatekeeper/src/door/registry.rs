//! Registry of door backends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{DoorController, DoorDescriptor, DoorEndpoint, TestDoorController};
use crate::error::ConfigurationError;
use crate::messages::DoorType;

/// Builds a controller for one door.
pub type ControllerFactory = Arc<dyn Fn(&DoorEndpoint) -> Box<dyn DoorController> + Send + Sync>;

/// Maps each door type to the constructor of its backend.
///
/// Door types the keymaster can name but that have no registered backend
/// are rejected at configuration time.
#[derive(Clone)]
pub struct ControllerRegistry {
    factories: HashMap<DoorType, ControllerFactory>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the backend for `door_type`.
    pub fn register<F>(&mut self, door_type: DoorType, factory: F)
    where
        F: Fn(&DoorEndpoint) -> Box<dyn DoorController> + Send + Sync + 'static,
    {
        self.factories.insert(door_type, Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, door_type: DoorType, factory: F) -> Self
    where
        F: Fn(&DoorEndpoint) -> Box<dyn DoorController> + Send + Sync + 'static,
    {
        self.register(door_type, factory);
        self
    }

    pub fn is_registered(&self, door_type: DoorType) -> bool {
        self.factories.contains_key(&door_type)
    }

    /// Registered door types, in a stable order.
    pub fn registered(&self) -> Vec<DoorType> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Construct the controller for a descriptor.
    pub fn build(
        &self,
        descriptor: &DoorDescriptor,
    ) -> Result<(DoorType, Box<dyn DoorController>), ConfigurationError> {
        let unsupported = || ConfigurationError::UnsupportedDoorType {
            door: descriptor.name.clone(),
            door_type: descriptor.door_type.clone(),
        };

        let door_type: DoorType = descriptor.door_type.parse().map_err(|_| unsupported())?;
        let factory = self.factories.get(&door_type).ok_or_else(unsupported)?;

        Ok((door_type, factory(&descriptor.endpoint)))
    }
}

impl Default for ControllerRegistry {
    /// Only the no-op `test` backend.
    fn default() -> Self {
        Self::new().with(DoorType::Test, |endpoint| {
            Box::new(TestDoorController::new(endpoint.clone()))
        })
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}

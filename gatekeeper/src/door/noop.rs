//! Door type `test`: a controller that talks to nothing.

use async_trait::async_trait;
use tracing::debug;

use super::{CardholderCache, Change, DoorCode, DoorController, DoorEndpoint, DoorError, DoorEvent};

/// Reference backend. Every operation succeeds and returns nothing.
#[derive(Debug)]
pub struct TestDoorController {
    endpoint: DoorEndpoint,
    cardholders: CardholderCache,
}

impl TestDoorController {
    pub fn new(endpoint: DoorEndpoint) -> Self {
        Self {
            endpoint,
            cardholders: CardholderCache::new(),
        }
    }

    pub fn endpoint(&self) -> &DoorEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl DoorController for TestDoorController {
    fn cardholders(&self) -> &CardholderCache {
        &self.cardholders
    }

    async fn test_connection(&self) -> bool {
        true
    }

    async fn set_time(&mut self) -> Result<(), DoorError> {
        debug!(ip = %self.endpoint.ip_address, "set_time");
        Ok(())
    }

    async fn load_cardholders(&mut self) -> Result<(), DoorError> {
        Ok(())
    }

    async fn load_credentials(&mut self) -> Result<(), DoorError> {
        Ok(())
    }

    async fn clear_door_codes(&mut self) -> Result<(), DoorError> {
        Ok(())
    }

    async fn process_door_codes(
        &mut self,
        _door_codes: &[DoorCode],
        _load_credentials: bool,
    ) -> Result<Vec<Change>, DoorError> {
        Ok(Vec::new())
    }

    async fn process_changes(&mut self, _changes: &[Change]) -> Result<(), DoorError> {
        Ok(())
    }

    async fn pull_events(&self, _count: usize) -> Result<Vec<DoorEvent>, DoorError> {
        Ok(Vec::new())
    }
}

//! Gatekeeper - door controller synchronization
//!
//! Keeps a site's door controllers in line with a remote keymaster:
//! - Authenticated, freshness-checked encrypted channel to the keymaster
//! - Trait-based door backends chosen per door type through a registry
//! - Idempotent code reconciliation (diff, then apply)
//! - Event log harvest and push
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Gatekeeper                 │
//! │   (configure, sync, reconcile, push)    │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌─────────────┐       ┌────────────────┐
//! │SecureChannel│       │ DoorController │
//! │ (Transport: │       │ (test, memory, │
//! │  HTTP/mock) │       │  registered)   │
//! └─────────────┘       └────────────────┘
//! ```

pub mod channel;
pub mod door;
pub mod error;
pub mod gatekeeper;
pub mod messages;

// Re-export main types for convenience
pub use channel::{ChannelConfig, ChannelKey, Decrypted, Envelope, SecureChannel, Transport};
pub use door::{Change, ControllerRegistry, DoorCode, DoorController, DoorEndpoint, DoorError, DoorEvent};
pub use error::{ConfigurationError, ErrorKind, GatekeeperError, Result};
pub use gatekeeper::{CheckIn, Door, DoorConfig, Gatekeeper, GatekeeperConfig};
pub use messages::{DoorEventType, DoorType};

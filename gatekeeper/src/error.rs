//! Error taxonomy for the gatekeeper.
//!
//! Every failure surfaced to the caller of a sync cycle is a [`GatekeeperError`].
//! Nothing here is retried internally; retry and backoff belong to whoever
//! schedules the cycle.

use std::fmt;

use crate::channel::{DecryptError, EncryptError};
use crate::door::DoorError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Problems with local configuration, detected before any exchange happens.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// No encryption key was supplied
    #[error("Missing encryption key")]
    MissingKey,

    /// The key is not 32 bytes of URL-safe base64
    #[error("Malformed encryption key: {0}")]
    MalformedKey(String),

    /// The channel has no keymaster endpoint to send to
    #[error("No keymaster endpoint configured")]
    MissingEndpoint,

    /// The HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    /// The keymaster asked for a door type no controller is registered for
    #[error("Unsupported door type '{door_type}' for door '{door}'")]
    UnsupportedDoorType { door: String, door_type: String },

    /// Two descriptors in one configuration share a name
    #[error("Duplicate door name '{0}' in configuration")]
    DuplicateDoor(String),

    /// The keymaster returned a configuration with no doors
    #[error("Keymaster returned an empty door configuration")]
    NoDoors,
}

/// Main error type for gatekeeper operations.
#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    /// Local configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Network or HTTP failure talking to the keymaster
    #[error("Transport error for '{tag}' ({endpoint}{}): {reason}", status_suffix(.status))]
    Transport {
        endpoint: String,
        tag: String,
        status: Option<u16>,
        reason: String,
    },

    /// Malformed envelope, wrong HTTP method, or unexpected payload shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Forged, corrupt, or expired ciphertext
    #[error("Could not decrypt '{field}': {source}")]
    Decryption {
        field: &'static str,
        #[source]
        source: DecryptError,
    },

    /// A message could not be sealed for sending
    #[error("Could not encrypt '{field}': {source}")]
    Encryption {
        field: &'static str,
        #[source]
        source: EncryptError,
    },

    /// The keymaster answered with an explicit `error` field
    #[error("Keymaster rejected '{tag}': {message}")]
    Remote { tag: String, message: String },

    /// The handshake reply was not the expected one
    #[error("Could not connect to Keymaster: unexpected handshake reply {reply:?}")]
    Handshake { reply: String },

    /// A door-scoped call was made before doors were configured
    #[error("Doors not configured (called {operation} before configure_doors)")]
    State { operation: &'static str },

    /// The keymaster did not acknowledge a push with the success sentinel
    #[error("Sync of '{tag}' failed: invalid response {reply:?}")]
    Sync { tag: String, reply: String },

    /// A door controller failed or timed out
    #[error("Door '{door}' failed during {operation}: {source}")]
    Door {
        door: String,
        operation: &'static str,
        #[source]
        source: DoorError,
    },

    /// No door with that name is configured
    #[error("Door not found: {0}")]
    DoorNotFound(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(", HTTP {s}")).unwrap_or_default()
}

/// Flat classification of a [`GatekeeperError`], for logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Protocol,
    Decryption,
    Encryption,
    Remote,
    Handshake,
    State,
    Sync,
    Door,
    DoorNotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Decryption => "decryption",
            ErrorKind::Encryption => "encryption",
            ErrorKind::Remote => "remote",
            ErrorKind::Handshake => "handshake",
            ErrorKind::State => "state",
            ErrorKind::Sync => "sync",
            ErrorKind::Door => "door",
            ErrorKind::DoorNotFound => "door_not_found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatekeeperError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatekeeperError::Configuration(_) => ErrorKind::Configuration,
            GatekeeperError::Transport { .. } => ErrorKind::Transport,
            GatekeeperError::Protocol(_) => ErrorKind::Protocol,
            GatekeeperError::Decryption { .. } => ErrorKind::Decryption,
            GatekeeperError::Encryption { .. } => ErrorKind::Encryption,
            GatekeeperError::Remote { .. } => ErrorKind::Remote,
            GatekeeperError::Handshake { .. } => ErrorKind::Handshake,
            GatekeeperError::State { .. } => ErrorKind::State,
            GatekeeperError::Sync { .. } => ErrorKind::Sync,
            GatekeeperError::Door { .. } => ErrorKind::Door,
            GatekeeperError::DoorNotFound(_) => ErrorKind::DoorNotFound,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        GatekeeperError::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = GatekeeperError::Handshake {
            reply: "nope".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Handshake);
        assert_eq!(err.kind().as_str(), "handshake");

        let err: GatekeeperError = ConfigurationError::MissingKey.into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_transport_display_includes_status() {
        let err = GatekeeperError::Transport {
            endpoint: "http://keymaster/".to_string(),
            tag: "pull_configuration".to_string(),
            status: Some(502),
            reason: "Bad Gateway".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("HTTP 502"), "got: {text}");
        assert!(text.contains("pull_configuration"));

        let err = GatekeeperError::Transport {
            endpoint: "http://keymaster/".to_string(),
            tag: "check_in".to_string(),
            status: None,
            reason: "connection refused".to_string(),
        };
        assert!(!err.to_string().contains("HTTP"));
    }
}

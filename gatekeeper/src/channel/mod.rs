//! Encrypted channel between a gatekeeper and its keymaster.
//!
//! # Protocol
//!
//! Both directions use the same [`Envelope`]: an encrypted `message` (the tag,
//! or a JSON document for configuration and door codes), an optional encrypted
//! `data` JSON payload, and, in responses only, a plaintext `error`.
//!
//! ```text
//! Gatekeeper --POST message=<token>&data=<token>--> Keymaster
//!            <--{"message": "<token>", "data": "<token>"}--
//!            <--{"error": "..."}--                (rejection)
//! ```
//!
//! # Clock Skew
//!
//! Tokens carry their creation time and are refused once older than the
//! channel's freshness window (see [`crypto`]). The gatekeeper and keymaster
//! hosts must run synchronized clocks (NTP); a large skew makes every exchange
//! fail with a decryption error even though the key is right.

pub mod crypto;
pub mod envelope;
pub mod mock;
pub mod transport;

pub use crypto::{ChannelKey, DecryptError, EncryptError, MessageCipher};
pub use envelope::Envelope;
pub use mock::{MockKeymaster, MockReply};
pub use transport::{HttpTransport, Transport};

use std::sync::Arc;
use std::time::Duration;

use hyper::{Method, Request};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConfigurationError, GatekeeperError, Result};

/// Default freshness window (10 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default bound on one keymaster exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings needed to open a channel.
#[derive(Clone)]
pub struct ChannelConfig {
    /// URL-safe base64 key shared with the keymaster
    pub encryption_key: Option<String>,
    /// Keymaster endpoint; not needed on the receiving side
    pub keymaster_url: Option<String>,
    /// Maximum accepted message age
    pub ttl: Duration,
    /// Bound on one HTTP exchange
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            keymaster_url: None,
            ttl: DEFAULT_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| ".."))
            .field("keymaster_url", &self.keymaster_url)
            .field("ttl", &self.ttl)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Plaintext content of an envelope after decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct Decrypted {
    pub message: String,
    pub data: Option<Value>,
}

/// Authenticated, freshness-checked channel to the keymaster.
///
/// One channel belongs to one gatekeeper; sharing it between orchestrators
/// needs external synchronization.
pub struct SecureChannel {
    cipher: MessageCipher,
    transport: Option<Arc<dyn Transport>>,
}

impl SecureChannel {
    /// Build a channel from configuration. Fails right away on a missing or
    /// malformed key.
    pub fn from_config(config: &ChannelConfig) -> Result<Self> {
        let encoded = config
            .encryption_key
            .as_deref()
            .ok_or(ConfigurationError::MissingKey)?;
        let key = ChannelKey::from_base64(encoded)?;

        let mut channel = Self::new(&key, config.ttl);
        if let Some(url) = &config.keymaster_url {
            channel.transport = Some(Arc::new(HttpTransport::new(
                url.clone(),
                config.request_timeout,
            )?));
        }
        Ok(channel)
    }

    /// Create a channel with no outbound transport (receive side only).
    pub fn new(key: &ChannelKey, ttl: Duration) -> Self {
        Self {
            cipher: MessageCipher::new(key, ttl),
            transport: None,
        }
    }

    /// Send through a custom transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Keymaster endpoint, if this channel can send.
    pub fn endpoint(&self) -> Option<&str> {
        self.transport.as_ref().map(|t| t.endpoint())
    }

    pub fn ttl(&self) -> Duration {
        self.cipher.ttl()
    }

    /// Send `tag` (and an optional JSON payload) and return the decrypted reply.
    pub async fn send(&self, tag: &str, payload: Option<&Value>) -> Result<Decrypted> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(ConfigurationError::MissingEndpoint)?;

        let request = self.seal(tag, payload)?;
        debug!(
            tag,
            endpoint = transport.endpoint(),
            with_data = request.data.is_some(),
            "Sending message to keymaster"
        );

        let response = transport.exchange(tag, &request).await?;

        if let Some(error) = response.error {
            warn!(tag, %error, "Keymaster returned an error");
            return Err(GatekeeperError::Remote {
                tag: tag.to_string(),
                message: error,
            });
        }

        let message = response.message.ok_or_else(|| {
            GatekeeperError::protocol(format!("Response to '{tag}' carried no message"))
        })?;

        self.open_fields(&message, response.data.as_deref())
    }

    /// Decode an inbound request: POST only, `message` required.
    pub fn receive<B: AsRef<[u8]>>(&self, request: &Request<B>) -> Result<Decrypted> {
        if request.method() != Method::POST {
            return Err(GatekeeperError::protocol(format!(
                "Must be POST, got {}",
                request.method()
            )));
        }

        let envelope = Envelope::from_form(request.body().as_ref())
            .map_err(|e| GatekeeperError::protocol(format!("Malformed form body: {e}")))?;

        self.open(&envelope)
    }

    /// Decrypt an envelope that has already been parsed.
    pub fn open(&self, envelope: &Envelope) -> Result<Decrypted> {
        let message = envelope
            .message
            .as_deref()
            .ok_or_else(|| GatekeeperError::protocol("No message in POST"))?;

        debug!(size = message.len(), "Received encrypted message");
        let decrypted = self.open_fields(message, envelope.data.as_deref())?;
        debug!(plaintext = %decrypted.message, "Decrypted message");
        Ok(decrypted)
    }

    /// Encrypt a message (and optional JSON payload) into an envelope.
    ///
    /// The keymaster side uses this to build replies that [`send`](Self::send)
    /// can read.
    pub fn seal(&self, message: &str, data: Option<&Value>) -> Result<Envelope> {
        let sealed_message = self
            .cipher
            .encrypt(message.as_bytes())
            .map_err(|source| GatekeeperError::Encryption {
                field: "message",
                source,
            })?;

        let sealed_data = data
            .map(|value| {
                let json = serde_json::to_string(value)
                    .map_err(|e| GatekeeperError::protocol(format!("Unserializable payload: {e}")))?;
                self.cipher
                    .encrypt(json.as_bytes())
                    .map_err(|source| GatekeeperError::Encryption {
                        field: "data",
                        source,
                    })
            })
            .transpose()?;

        Ok(Envelope::message(sealed_message, sealed_data))
    }

    /// Plaintext error reply for the keymaster side.
    pub fn error_reply(&self, error: impl Into<String>) -> Envelope {
        Envelope::error(error)
    }

    fn open_fields(&self, message: &str, data: Option<&str>) -> Result<Decrypted> {
        let message = self
            .cipher
            .decrypt_text(message)
            .map_err(|source| GatekeeperError::Decryption {
                field: "message",
                source,
            })?;

        let data = data
            .map(|token| {
                let json = self
                    .cipher
                    .decrypt_text(token)
                    .map_err(|source| GatekeeperError::Decryption {
                        field: "data",
                        source,
                    })?;
                serde_json::from_str::<Value>(&json)
                    .map_err(|e| GatekeeperError::protocol(format!("Data is not valid JSON: {e}")))
            })
            .transpose()?;

        Ok(Decrypted { message, data })
    }
}

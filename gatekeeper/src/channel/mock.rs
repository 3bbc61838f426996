//! In-process keymaster for testing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{ChannelKey, Decrypted, Envelope, SecureChannel, Transport};
use crate::error::{GatekeeperError, Result};

const MOCK_ENDPOINT: &str = "mock://keymaster";

/// Scripted answer to one tag.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Encrypted message, no data
    Message(String),
    /// Encrypted message plus encrypted JSON data
    WithData(String, Value),
    /// Plaintext `error` field
    Error(String),
    /// Send this envelope as-is
    Raw(Envelope),
    /// Fail the exchange as an HTTP error with this status
    Status(u16),
}

/// Transport that plays the keymaster: decrypts each request with the shared
/// key, records it, and answers from a reply table keyed by tag.
///
/// Tags without a scripted reply get an `error` envelope, as a real keymaster
/// does for messages it does not understand.
pub struct MockKeymaster {
    channel: SecureChannel,
    replies: Mutex<HashMap<String, MockReply>>,
    received: Mutex<Vec<Decrypted>>,
}

impl MockKeymaster {
    /// Create a mock keymaster sharing `key` with the gatekeeper.
    pub fn new(key: &ChannelKey, ttl: Duration) -> Self {
        Self {
            channel: SecureChannel::new(key, ttl),
            replies: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Script the reply for `tag`.
    pub fn with_reply(mut self, tag: impl Into<String>, reply: MockReply) -> Self {
        self.replies.get_mut().insert(tag.into(), reply);
        self
    }

    /// Replace the reply for `tag` after construction.
    pub async fn set_reply(&self, tag: impl Into<String>, reply: MockReply) {
        self.replies.lock().await.insert(tag.into(), reply);
    }

    /// Every request received so far, decrypted, oldest first.
    pub async fn received(&self) -> Vec<Decrypted> {
        self.received.lock().await.clone()
    }

    /// Tags received so far, oldest first.
    pub async fn received_tags(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .map(|d| d.message.clone())
            .collect()
    }

    /// How many times `tag` was received.
    pub async fn call_count(&self, tag: &str) -> usize {
        self.received
            .lock()
            .await
            .iter()
            .filter(|d| d.message == tag)
            .count()
    }
}

#[async_trait]
impl Transport for MockKeymaster {
    fn endpoint(&self) -> &str {
        MOCK_ENDPOINT
    }

    async fn exchange(&self, tag: &str, request: &Envelope) -> Result<Envelope> {
        let inbound = match self.channel.open(request) {
            Ok(inbound) => inbound,
            Err(e) => return Ok(Envelope::error(e.to_string())),
        };

        let reply = self.replies.lock().await.get(&inbound.message).cloned();
        self.received.lock().await.push(inbound.clone());

        match reply {
            None => Ok(Envelope::error(format!("Unknown message: {}", inbound.message))),
            Some(MockReply::Message(message)) => self.channel.seal(&message, None),
            Some(MockReply::WithData(message, data)) => self.channel.seal(&message, Some(&data)),
            Some(MockReply::Error(error)) => Ok(self.channel.error_reply(error)),
            Some(MockReply::Raw(envelope)) => Ok(envelope),
            Some(MockReply::Status(status)) => Err(GatekeeperError::Transport {
                endpoint: MOCK_ENDPOINT.to_string(),
                tag: tag.to_string(),
                status: Some(status),
                reason: "mock status".to_string(),
            }),
        }
    }
}

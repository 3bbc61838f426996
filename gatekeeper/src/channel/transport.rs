//! Request/response transport for keymaster envelopes.
//!
//! The [`Transport`] trait lets the channel run over real HTTP in production
//! and over an in-process keymaster in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::envelope::Envelope;
use crate::error::{ConfigurationError, GatekeeperError, Result};

/// Carries one request envelope to the keymaster and returns its response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Where requests go, for error context and logs.
    fn endpoint(&self) -> &str;

    /// Perform one exchange. `tag` is the plaintext tag, used only for error
    /// context; the envelope itself is already encrypted.
    async fn exchange(&self, tag: &str, request: &Envelope) -> Result<Envelope>;
}

/// HTTP POST transport: form-encoded request, JSON response.
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport whose every exchange is bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn transport_error(&self, tag: &str, status: Option<u16>, reason: impl Into<String>) -> GatekeeperError {
        GatekeeperError::Transport {
            endpoint: self.url.clone(),
            tag: tag.to_string(),
            status,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn exchange(&self, tag: &str, request: &Envelope) -> Result<Envelope> {
        let response = self
            .client
            .post(&self.url)
            .form(request)
            .send()
            .await
            .map_err(|e| self.transport_error(tag, None, e.to_string()))?;

        let status = response.status();
        debug!(tag, status = status.as_u16(), "Keymaster responded");

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unexpected status");
            return Err(self.transport_error(tag, Some(status.as_u16()), reason));
        }

        response
            .json::<Envelope>()
            .await
            .map_err(|e| self.transport_error(tag, Some(status.as_u16()), format!("invalid JSON response: {e}")))
    }
}

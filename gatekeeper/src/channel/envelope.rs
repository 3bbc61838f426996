//! Wire envelope exchanged with the keymaster.

use serde::{Deserialize, Serialize};

/// Form fields of a request, or JSON fields of a response.
///
/// `message` and `data` hold ciphertext. `error` is plaintext and only appears
/// in responses; when present it wins over everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn message(message: String, data: Option<String>) -> Self {
        Self {
            message: Some(message),
            data,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Decode a form-encoded request body.
    pub fn from_form(body: &[u8]) -> Result<Self, serde_urlencoded::de::Error> {
        serde_urlencoded::from_bytes(body)
    }

    /// Encode as a form body.
    pub fn to_form(&self) -> Result<String, serde_urlencoded::ser::Error> {
        serde_urlencoded::to_string(self)
    }
}

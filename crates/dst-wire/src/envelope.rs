//! The user-message envelope.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A message is a record `{type, body?, headers?, sender?, id?}`.
///
/// `body` is kept as an opaque [`serde_json::Value`] — the controller
/// never inspects it, only user code and tests decode it into something
/// typed. `sender` is either a real `host:port` or the sentinel string
/// `"local"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Sentinel sender/id used for local (operator-originated) messages.
pub const LOCAL: &str = "local";

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: None,
            headers: None,
            sender: None,
            id: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_local(&self) -> bool {
        self.sender.as_deref() == Some(LOCAL)
    }

    /// Encodes the envelope as a self-describing UTF-8 byte string.
    pub fn encode(&self) -> Vec<u8> {
        // Constructed from `Self`, so serialization cannot fail.
        serde_json::to_vec(self).expect("envelope always serializes")
    }

    /// Decodes an envelope, failing with [`WireError::Malformed`] if
    /// required fields are absent or mistyped rather than panicking —
    /// the controller turns this into a dispatch-time discard.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(raw).map_err(WireError::Malformed)
    }
}

/// Errors raised while decoding the wire codec's byte representations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame exceeds maximum length ({len} > {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("truncated frame header")]
    TruncatedHeader,
}

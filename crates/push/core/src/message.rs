//! Inbound message events and their dedup fingerprints.

use std::fmt;

use base64::Engine as _;
use sha2::{Digest as _, Sha256};

use crate::Owner;

/// A chat message that may warrant a push notification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InboundMessage {
    /// Stanza identifier assigned by the sender, if any.
    #[serde(default)]
    pub id: Option<String>,

    /// Full address of the sender.
    pub from: String,

    /// Message body text.
    #[serde(default)]
    pub body: Option<String>,
}

impl InboundMessage {
    /// Create a message with a body.
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            from: from.into(),
            body: Some(body.into()),
        }
    }

    /// Set the stanza identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether this message carries content worth notifying about.
    ///
    /// Chat states, receipts and other body-less stanzas never trigger a push.
    pub fn is_notifiable(&self) -> bool {
        self.body.as_deref().is_some_and(|body| !body.is_empty())
    }

    /// Stable digest identifying the same logical message for `owner`.
    ///
    /// Uses the stanza ID when present, otherwise sender and body. Two distinct
    /// messages with identical text from the same sender collide within the
    /// dedup window when neither has an ID.
    pub fn fingerprint(&self, owner: &Owner) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(owner.as_str().as_bytes());
        hasher.update([0]);
        match &self.id {
            Some(id) => {
                hasher.update(b"id");
                hasher.update([0]);
                hasher.update(id.as_bytes());
            }
            None => {
                hasher.update(b"content");
                hasher.update([0]);
                hasher.update(self.from.as_bytes());
                hasher.update([0]);
                hasher.update(self.body.as_deref().unwrap_or_default().as_bytes());
            }
        }
        Fingerprint(hasher.finalize().into())
    }
}

/// SHA-256 digest of a message's identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

//! Domain types shared between the watcher, sender, and backend client.

use serde::{Deserialize, Serialize};

/// Deterministic dedup/idempotency key for a mirrored message.
///
/// Derived from `(source id, source-native message id)`; the same pair always
/// produces the same fingerprint. Doubles as the per-source cursor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One watched conversation, as configured in the backend.
///
/// The backend owns these records; the watcher holds a read-only copy per
/// reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    /// Locator of the rendered conversation view (channel URL).
    pub url: String,
    /// Display name, used in outbound formatting and operator logs.
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// Cursor: fingerprint of the last message pushed for this source.
    #[serde(default)]
    pub last_message_fingerprint: Option<Fingerprint>,
    /// RFC 3339 timestamp of the last observed message.
    #[serde(default)]
    pub last_seen_at: Option<String>,
    /// Destination routing hint: sub-thread (topic) id in the destination
    /// chat, used when the destination has sub-threads enabled.
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Whether attachments observed on this source are mirrored.
    #[serde(default = "default_true")]
    pub mirror_attachments: bool,
}

fn default_true() -> bool {
    true
}

/// A message observed in the rendered view, as emitted by the
/// change-detection protocol. Transient; never persisted by this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Source-native message identifier (DOM node id).
    pub native_id: String,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// RFC 3339 timestamp from the rendered node, when present.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RawEvent {
    /// A message with neither text nor attachments carries nothing worth
    /// forwarding (structural mutation, not a message).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Payload for pushing a newly observed message to the backend queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub fingerprint: Fingerprint,
    pub native_id: String,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Terminal delivery status of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

/// A queued message pending delivery, owned by the backend.
///
/// This process only creates them (push) and terminally updates them
/// (mark-sent / mark-failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub source_id: String,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl OutboundMessage {
    /// Attachments alone satisfy the non-empty check; a message is only
    /// "empty" when it has neither text nor attachments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Outbound destination configuration, owned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Destination identifier: `@username`, a `-100…` channel id, or a bare
    /// numeric chat id.
    pub identifier: String,
    /// Informational destination kind reported by the backend ("group",
    /// "channel", ...). Not interpreted by the sender.
    #[serde(default)]
    pub destination_type: Option<String>,
    /// Route each source into its own sub-thread (topic) when the source
    /// carries a `topic_id` hint.
    #[serde(default)]
    pub use_sub_threads: bool,
}

/// Liveness state reported to the backend status collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

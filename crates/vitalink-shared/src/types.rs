//! Domain model mirrored from the hosted backend documents.
//!
//! Every struct derives `Serialize`/`Deserialize` with the camelCase
//! field names the backends use, so the same types cross the document
//! boundary, the local cache, and the view layer.

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::time::{self, Timestamp};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque user identifier assigned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// Opaque conversation identifier, stable for the conversation lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// Message identifier allocated by the realtime store and reused as the
/// durable-store key. Unique within its conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Who produced a message. On the wire this is the `senderId` string,
/// with `"system"` reserved for system notices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sender {
    User(UserId),
    System,
}

const SYSTEM_SENDER: &str = "system";

impl Sender {
    /// The wire representation stored in `senderId`.
    pub fn as_wire(&self) -> &str {
        match self {
            Sender::User(id) => id.as_str(),
            Sender::System => SYSTEM_SENDER,
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        if raw == SYSTEM_SENDER {
            Sender::System
        } else {
            Sender::User(UserId::new(raw))
        }
    }

    pub fn is_user(&self, user: &UserId) -> bool {
        matches!(self, Sender::User(id) if id == user)
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Sender::User(id) => Some(id),
            Sender::System => None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

impl Serialize for Sender {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(de::Error::custom("empty sender id"));
        }
        Ok(Sender::from_wire(&raw))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery status of a message as observed by one client. Strictly
/// forward-only: use [`MessageStatus::advance`] so a late event can
/// never regress a status.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Move to `to` only if it is further along than the current status.
    pub fn advance(&mut self, to: MessageStatus) {
        if to > *self {
            *self = to;
        }
    }
}

/// Type-specific payload of a message, tagged by the `type` field on
/// the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Audio {
        #[serde(rename = "audioUrl")]
        audio_url: String,
        /// Recording length in seconds.
        #[serde(default)]
        duration: f64,
    },
    File {
        #[serde(rename = "fileUrl")]
        file_url: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileSize", default)]
        file_size: u64,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    System {
        text: String,
    },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        MessageBody::Text { text: text.into() }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Text { .. } => "text",
            MessageBody::Image { .. } => "image",
            MessageBody::Audio { .. } => "audio",
            MessageBody::File { .. } => "file",
            MessageBody::Location { .. } => "location",
            MessageBody::System { .. } => "system",
        }
    }

    /// One-line summary used for the conversation list preview.
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text { text } | MessageBody::System { text } => text.clone(),
            MessageBody::Image { caption, .. } => match caption {
                Some(c) if !c.is_empty() => c.clone(),
                _ => "Photo".to_string(),
            },
            MessageBody::Audio { .. } => "Voice message".to_string(),
            MessageBody::File { file_name, .. } => file_name.clone(),
            MessageBody::Location { .. } => "Location".to_string(),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "senderId")]
    pub sender: Sender,
    /// Client-generated send time. `None` when the stored value was
    /// missing or malformed; such messages still render, with an empty
    /// time label.
    #[serde(default, deserialize_with = "time::lenient_timestamp")]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    /// Construct an optimistic outgoing message (`status = Pending`,
    /// timestamp now).
    pub fn outgoing(id: MessageId, sender: UserId, body: MessageBody) -> Self {
        Self {
            id,
            sender: Sender::User(sender),
            timestamp: Some(Timestamp::now()),
            status: MessageStatus::Pending,
            body,
        }
    }

    /// Parse a raw backend document. `None` (with the reason logged by
    /// the caller) when the document does not have the message shape.
    pub fn from_document(doc: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(doc.clone()).ok()
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A conversation document from the durable store, with the
/// denormalized last-message summary the backend maintains on every
/// send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub is_group: bool,
    /// Present only for group conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_sender_id: Option<Sender>,
    #[serde(default, deserialize_with = "time::lenient_timestamp")]
    pub last_message_at: Option<Timestamp>,
    /// Per-participant unread counters.
    #[serde(default)]
    pub unread_count: HashMap<UserId, u32>,
    #[serde(default, deserialize_with = "time::lenient_timestamp")]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "time::lenient_timestamp")]
    pub updated_at: Option<Timestamp>,
}

impl Conversation {
    /// Unread count for one participant (0 when absent).
    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread_count.get(user).copied().unwrap_or(0)
    }

    /// For a direct conversation, the participant who is not `viewer`.
    pub fn peer_of(&self, viewer: &UserId) -> Option<&UserId> {
        if self.is_group {
            return None;
        }
        self.participants.iter().find(|p| *p != viewer)
    }

    /// Parse a raw snapshot document. Documents missing an id are
    /// rejected; malformed timestamps degrade to `None` rather than
    /// rejecting the document.
    pub fn from_document(doc: &serde_json::Value) -> Option<Self> {
        let conversation: Conversation = serde_json::from_value(doc.clone()).ok()?;
        if conversation.id.as_str().is_empty() {
            return None;
        }
        Some(conversation)
    }
}

// ---------------------------------------------------------------------------
// Last-message summary
// ---------------------------------------------------------------------------

/// The denormalized summary written to the conversation document on
/// every send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub preview: String,
    pub kind: String,
    pub sender: Sender,
    pub at: Timestamp,
}

impl LastMessage {
    pub fn of(message: &Message) -> Self {
        Self {
            preview: message.body.preview(),
            kind: message.body.kind().to_string(),
            sender: message.sender.clone(),
            at: message.timestamp.unwrap_or_else(Timestamp::now),
        }
    }
}

// ---------------------------------------------------------------------------
// User profile
// ---------------------------------------------------------------------------

/// A user document from the durable `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default, deserialize_with = "time::lenient_timestamp")]
    pub last_seen: Option<Timestamp>,
}

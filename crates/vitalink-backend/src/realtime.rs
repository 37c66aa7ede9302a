//! Consumed contract of the low-latency realtime store.
//!
//! A path-addressed tree with point writes and three listener kinds:
//! child-added and child-changed on a conversation's message path, and
//! value-changed on a user's presence node. Messages travel here first
//! for instant delivery; the durable store catches up asynchronously.

use async_trait::async_trait;
use rand::Rng;

use vitalink_shared::{ConversationId, Message, MessageId, MessageStatus, Timestamp, UserId};

use crate::error::BackendResult;
use crate::handle::Subscription;

/// One ingress event on a conversation's message path.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    /// child-added: a node appeared under the message path.
    Added(Message),
    /// child-changed: an existing node's fields changed.
    Changed(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Added(m) | MessageEvent::Changed(m) => m,
        }
    }
}

/// Ephemeral typing flag for one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingSignal {
    pub user: UserId,
    pub is_typing: bool,
    /// When the writer last touched the flag. Readers treat old
    /// entries as "not typing" regardless of the boolean, which covers
    /// writers that crashed before clearing it.
    pub at: Timestamp,
}

/// Online/offline state for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSignal {
    pub user: UserId,
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Allocate a message id client-side, push-key style: no network
    /// round trip, chronologically sortable, unique within the
    /// conversation for any realistic session.
    fn allocate_message_id(&self, conversation: &ConversationId) -> MessageId;

    /// Write a message node. An existing node with the same id is
    /// overwritten, which subscribers observe as child-changed.
    async fn put_message(
        &self,
        conversation: &ConversationId,
        message: &Message,
    ) -> BackendResult<()>;

    /// Point-update of one message's status field.
    async fn set_message_status(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        status: MessageStatus,
    ) -> BackendResult<()>;

    /// child-added / child-changed listener on the conversation's
    /// message path. Does not replay existing children; only nodes
    /// written after attachment are delivered.
    async fn watch_messages(
        &self,
        conversation: &ConversationId,
    ) -> BackendResult<Subscription<MessageEvent>>;

    /// Write this user's ephemeral typing flag for the conversation.
    async fn set_typing(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        is_typing: bool,
        at: Timestamp,
    ) -> BackendResult<()>;

    /// Listener over all typing flags in the conversation, including
    /// the caller's own (filtering is the consumer's job).
    async fn watch_typing(
        &self,
        conversation: &ConversationId,
    ) -> BackendResult<Subscription<TypingSignal>>;

    /// Write a user's presence node.
    async fn set_presence(
        &self,
        user: &UserId,
        online: bool,
        at: Timestamp,
    ) -> BackendResult<()>;

    /// value-changed listener on one user's presence node. Emits the
    /// current value on attach when one exists.
    async fn watch_presence(&self, user: &UserId) -> BackendResult<Subscription<PresenceSignal>>;
}

/// Alphabet for push ids: ASCII-ordered so ids sort chronologically as
/// strings.
const PUSH_CHARS: &[u8] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generate a 20-character push id: 8 characters of timestamp followed
/// by 12 random characters.
pub fn push_id(now: Timestamp) -> String {
    let mut id = Vec::with_capacity(20);
    let mut ms = now.as_millis().max(0) as u64;
    for _ in 0..8 {
        id.push(PUSH_CHARS[(ms % 64) as usize]);
        ms /= 64;
    }
    id[..8].reverse();

    let mut rng = rand::thread_rng();
    for _ in 0..12 {
        id.push(PUSH_CHARS[rng.gen_range(0..64)]);
    }
    String::from_utf8(id).expect("push alphabet is ASCII")
}

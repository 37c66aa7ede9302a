//! Consumed contract of the durable document store.
//!
//! Two collections: `users` keyed by user id and `conversations` keyed
//! by conversation id, the latter with a nested message sub-collection
//! keyed by the realtime-allocated message id. The store supports
//! equality/array-membership filters, single-field ordering, result
//! limits, and snapshot listeners that push the full matching result
//! set on every change. It is the system of record: once the realtime
//! and durable copies of a message converge, the durable copy wins.

use async_trait::async_trait;

use vitalink_shared::{
    Conversation, ConversationId, LastMessage, Message, MessageId, MessageStatus, Timestamp,
    UserId, UserProfile,
};

use crate::error::BackendResult;
use crate::handle::Subscription;

/// One emission from a conversation snapshot listener.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// The full replacement set of raw conversation documents matching
    /// the watched participant. Not a diff.
    Snapshot(Vec<serde_json::Value>),
    /// The subscription failed. Recoverable: the session survives, but
    /// no further events arrive on this subscription.
    Error(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // -- users ------------------------------------------------------------

    async fn get_user(&self, id: &UserId) -> BackendResult<Option<UserProfile>>;

    async fn put_user(&self, profile: &UserProfile) -> BackendResult<()>;

    /// Prefix search on display name, case-insensitive. The store has
    /// no disjunctive filters, so broader searches are combined
    /// client-side.
    async fn search_users(&self, query: &str) -> BackendResult<Vec<UserProfile>>;

    // -- conversations ----------------------------------------------------

    async fn get_conversation(&self, id: &ConversationId) -> BackendResult<Conversation>;

    async fn create_conversation(&self, conversation: &Conversation) -> BackendResult<()>;

    /// Snapshot listener over all conversations whose `participants`
    /// contain `participant`. Emits the current result set immediately
    /// and again on every change.
    async fn watch_conversations(
        &self,
        participant: &UserId,
    ) -> BackendResult<Subscription<ConversationEvent>>;

    /// Record a send on the conversation document: replace the
    /// denormalized last-message summary, bump `updatedAt`, and
    /// increment the unread counter of every participant except the
    /// sender.
    async fn apply_send(
        &self,
        id: &ConversationId,
        summary: &LastMessage,
    ) -> BackendResult<()>;

    /// Reset `user`'s unread counter to zero.
    async fn reset_unread(&self, id: &ConversationId, user: &UserId) -> BackendResult<()>;

    // -- message history --------------------------------------------------

    /// The most recent `limit` messages, ordered by timestamp
    /// descending.
    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: u32,
    ) -> BackendResult<Vec<Message>>;

    /// Up to `limit` messages strictly older than `before`, ordered by
    /// timestamp descending. An empty result means the history is
    /// exhausted.
    async fn messages_before(
        &self,
        id: &ConversationId,
        before: Timestamp,
        limit: u32,
    ) -> BackendResult<Vec<Message>>;

    /// Upsert the durable copy of a message, keyed by its id.
    async fn put_message(&self, id: &ConversationId, message: &Message) -> BackendResult<()>;

    /// Last-write-wins status update. Writing an already-held status is
    /// a harmless no-op, which is what makes mark-read idempotent.
    async fn set_message_status(
        &self,
        id: &ConversationId,
        message: &MessageId,
        status: MessageStatus,
    ) -> BackendResult<()>;
}

//! In-process implementation of both backend contracts.
//!
//! Backs the test suite and local development. State lives behind one
//! `tokio::sync::Mutex`; listener delivery is non-blocking
//! (`SubscriptionSender::deliver` uses `try_send`), so everything
//! happens under the lock without holding it across an await.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use vitalink_shared::{
    Conversation, ConversationId, LastMessage, Message, MessageId, MessageStatus, Timestamp,
    UserId, UserProfile,
};

use crate::document::{ConversationEvent, DocumentStore};
use crate::error::{BackendError, BackendResult};
use crate::handle::{Subscription, SubscriptionSender};
use crate::realtime::{push_id, MessageEvent, PresenceSignal, RealtimeStore, TypingSignal};

/// Hosted-backend stand-in holding both the durable and the realtime
/// trees in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    // durable store
    users: HashMap<UserId, UserProfile>,
    conversations: HashMap<ConversationId, Conversation>,
    history: HashMap<ConversationId, Vec<Message>>,

    // realtime store
    live: HashMap<ConversationId, Vec<Message>>,
    presence: HashMap<UserId, PresenceSignal>,

    // listeners
    conversation_subs: Vec<(UserId, SubscriptionSender<ConversationEvent>)>,
    message_subs: HashMap<ConversationId, Vec<SubscriptionSender<MessageEvent>>>,
    typing_subs: HashMap<ConversationId, Vec<SubscriptionSender<TypingSignal>>>,
    presence_subs: HashMap<UserId, Vec<SubscriptionSender<PresenceSignal>>>,

    fail_writes: bool,
    fail_reads: bool,
    fail_listeners: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make every subsequent write fail with a transient
    /// error until cleared.
    pub async fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().await.fail_writes = fail;
    }

    /// Test hook: make every subsequent read fail until cleared.
    pub async fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().await.fail_reads = fail;
    }

    /// Test hook: make every subsequent listener attach fail until
    /// cleared. Already-attached listeners keep delivering.
    pub async fn set_fail_listeners(&self, fail: bool) {
        self.inner.lock().await.fail_listeners = fail;
    }
}

impl Inner {
    fn check_writable(&self) -> BackendResult<()> {
        if self.fail_writes {
            Err(BackendError::Write("simulated backend failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_readable(&self) -> BackendResult<()> {
        if self.fail_reads {
            Err(BackendError::Read("simulated backend failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_listenable(&self) -> BackendResult<()> {
        if self.fail_listeners {
            Err(BackendError::Listener("simulated backend failure".into()))
        } else {
            Ok(())
        }
    }

    /// Raw documents for every conversation containing `participant`.
    fn snapshot_for(&self, participant: &UserId) -> Vec<serde_json::Value> {
        self.conversations
            .values()
            .filter(|c| c.participants.contains(participant))
            .filter_map(|c| serde_json::to_value(c).ok())
            .collect()
    }

    /// Re-deliver snapshots to every watcher who can see `id`.
    fn broadcast_conversation(&mut self, id: &ConversationId) {
        let Some(conversation) = self.conversations.get(id).cloned() else {
            return;
        };
        self.conversation_subs.retain(|(_, s)| s.is_live());
        for (user, sender) in &self.conversation_subs {
            if conversation.participants.contains(user) {
                let docs = self.snapshot_for(user);
                sender.deliver(ConversationEvent::Snapshot(docs));
            }
        }
    }

    fn broadcast_message(&mut self, conversation: &ConversationId, event: MessageEvent) {
        if let Some(subs) = self.message_subs.get_mut(conversation) {
            subs.retain(|s| s.is_live());
            for sub in subs.iter() {
                sub.deliver(event.clone());
            }
        }
    }

    fn broadcast_typing(&mut self, conversation: &ConversationId, signal: TypingSignal) {
        if let Some(subs) = self.typing_subs.get_mut(conversation) {
            subs.retain(|s| s.is_live());
            for sub in subs.iter() {
                sub.deliver(signal.clone());
            }
        }
    }

    fn broadcast_presence(&mut self, user: &UserId, signal: PresenceSignal) {
        if let Some(subs) = self.presence_subs.get_mut(user) {
            subs.retain(|s| s.is_live());
            for sub in subs.iter() {
                sub.deliver(signal.clone());
            }
        }
    }
}

/// Sort key for descending-by-timestamp queries; messages with no
/// usable timestamp sort oldest.
fn ts_or_zero(message: &Message) -> i64 {
    message.timestamp.map(|t| t.as_millis()).unwrap_or(0)
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get_user(&self, id: &UserId) -> BackendResult<Option<UserProfile>> {
        let inner = self.inner.lock().await;
        inner.check_readable()?;
        Ok(inner.users.get(id).cloned())
    }

    async fn put_user(&self, profile: &UserProfile) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        inner.users.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn search_users(&self, query: &str) -> BackendResult<Vec<UserProfile>> {
        let needle = query.to_lowercase();
        let inner = self.inner.lock().await;
        inner.check_readable()?;
        let mut hits: Vec<UserProfile> = inner
            .users
            .values()
            .filter(|u| u.display_name.to_lowercase().starts_with(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(hits)
    }

    async fn get_conversation(&self, id: &ConversationId) -> BackendResult<Conversation> {
        let inner = self.inner.lock().await;
        inner.check_readable()?;
        inner
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn create_conversation(&self, conversation: &Conversation) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        inner.broadcast_conversation(&conversation.id);
        Ok(())
    }

    async fn watch_conversations(
        &self,
        participant: &UserId,
    ) -> BackendResult<Subscription<ConversationEvent>> {
        let (sender, subscription) = Subscription::channel();
        let mut inner = self.inner.lock().await;
        inner.check_listenable()?;
        // Snapshot listeners emit the current result set on attach.
        sender.deliver(ConversationEvent::Snapshot(inner.snapshot_for(participant)));
        inner.conversation_subs.push((participant.clone(), sender));
        Ok(subscription)
    }

    async fn apply_send(&self, id: &ConversationId, summary: &LastMessage) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        {
            let conversation = inner
                .conversations
                .get_mut(id)
                .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
            conversation.last_message = Some(summary.preview.clone());
            conversation.last_message_type = Some(summary.kind.clone());
            conversation.last_message_sender_id = Some(summary.sender.clone());
            conversation.last_message_at = Some(summary.at);
            conversation.updated_at = Some(Timestamp::now());
            let participants = conversation.participants.clone();
            for participant in participants {
                if !summary.sender.is_user(&participant) {
                    *conversation.unread_count.entry(participant).or_insert(0) += 1;
                }
            }
        }
        inner.broadcast_conversation(id);
        Ok(())
    }

    async fn reset_unread(&self, id: &ConversationId, user: &UserId) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        let Some(conversation) = inner.conversations.get_mut(id) else {
            return Err(BackendError::NotFound(id.to_string()));
        };
        conversation.unread_count.insert(user.clone(), 0);
        inner.broadcast_conversation(id);
        Ok(())
    }

    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: u32,
    ) -> BackendResult<Vec<Message>> {
        let inner = self.inner.lock().await;
        inner.check_readable()?;
        let mut messages = inner.history.get(id).cloned().unwrap_or_default();
        messages.sort_by_key(|m| std::cmp::Reverse(ts_or_zero(m)));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn messages_before(
        &self,
        id: &ConversationId,
        before: Timestamp,
        limit: u32,
    ) -> BackendResult<Vec<Message>> {
        let inner = self.inner.lock().await;
        inner.check_readable()?;
        let mut messages: Vec<Message> = inner
            .history
            .get(id)
            .map(|all| {
                all.iter()
                    .filter(|m| ts_or_zero(m) < before.as_millis())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        messages.sort_by_key(|m| std::cmp::Reverse(ts_or_zero(m)));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn put_message(&self, id: &ConversationId, message: &Message) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        let history = inner.history.entry(id.clone()).or_default();
        match history.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => history.push(message.clone()),
        }
        Ok(())
    }

    async fn set_message_status(
        &self,
        id: &ConversationId,
        message: &MessageId,
        status: MessageStatus,
    ) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        match inner
            .history
            .get_mut(id)
            .and_then(|h| h.iter_mut().find(|m| &m.id == message))
        {
            Some(existing) => existing.status = status,
            None => debug!(conversation = %id, message = %message, "status write for unknown durable message"),
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeStore for MemoryBackend {
    fn allocate_message_id(&self, _conversation: &ConversationId) -> MessageId {
        MessageId::new(push_id(Timestamp::now()))
    }

    async fn put_message(
        &self,
        conversation: &ConversationId,
        message: &Message,
    ) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        let live = inner.live.entry(conversation.clone()).or_default();
        let event = match live.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message.clone();
                MessageEvent::Changed(message.clone())
            }
            None => {
                live.push(message.clone());
                MessageEvent::Added(message.clone())
            }
        };
        inner.broadcast_message(conversation, event);
        Ok(())
    }

    async fn set_message_status(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        status: MessageStatus,
    ) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        let updated = inner
            .live
            .get_mut(conversation)
            .and_then(|live| live.iter_mut().find(|m| &m.id == id))
            .map(|m| {
                m.status = status;
                m.clone()
            });
        match updated {
            Some(message) => {
                inner.broadcast_message(conversation, MessageEvent::Changed(message));
            }
            None => {
                debug!(conversation = %conversation, message = %id, "status write for unknown live message");
            }
        }
        Ok(())
    }

    async fn watch_messages(
        &self,
        conversation: &ConversationId,
    ) -> BackendResult<Subscription<MessageEvent>> {
        let (sender, subscription) = Subscription::channel();
        let mut inner = self.inner.lock().await;
        inner.check_listenable()?;
        inner
            .message_subs
            .entry(conversation.clone())
            .or_default()
            .push(sender);
        Ok(subscription)
    }

    async fn set_typing(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        is_typing: bool,
        at: Timestamp,
    ) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        inner.broadcast_typing(
            conversation,
            TypingSignal {
                user: user.clone(),
                is_typing,
                at,
            },
        );
        Ok(())
    }

    async fn watch_typing(
        &self,
        conversation: &ConversationId,
    ) -> BackendResult<Subscription<TypingSignal>> {
        let (sender, subscription) = Subscription::channel();
        let mut inner = self.inner.lock().await;
        inner.check_listenable()?;
        inner
            .typing_subs
            .entry(conversation.clone())
            .or_default()
            .push(sender);
        Ok(subscription)
    }

    async fn set_presence(
        &self,
        user: &UserId,
        online: bool,
        at: Timestamp,
    ) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable()?;
        let signal = PresenceSignal {
            user: user.clone(),
            online,
            last_seen: Some(at),
        };
        inner.presence.insert(user.clone(), signal.clone());
        inner.broadcast_presence(user, signal);
        Ok(())
    }

    async fn watch_presence(&self, user: &UserId) -> BackendResult<Subscription<PresenceSignal>> {
        let (sender, subscription) = Subscription::channel();
        let mut inner = self.inner.lock().await;
        inner.check_listenable()?;
        // value-changed listeners see the current value on attach.
        if let Some(current) = inner.presence.get(user) {
            sender.deliver(current.clone());
        }
        inner.presence_subs.entry(user.clone()).or_default().push(sender);
        Ok(subscription)
    }
}

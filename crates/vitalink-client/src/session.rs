//! The session context: one logged-in user, one event channel to the
//! renderer, and single ownership of every listener handle (the
//! conversation watch, the active conversation's actor, and 0..N
//! presence watches). [`ChatSession::logout`] detaches everything.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vitalink_backend::{DocumentStore, ListenerHandle, RealtimeStore};
use vitalink_shared::{time, Conversation, ConversationId, Timestamp, UserId, UserProfile};
use vitalink_store::{keys, CacheStore};

use crate::config::SyncConfig;
use crate::conversations::{self, ConversationWatch};
use crate::directory::UserDirectory;
use crate::engine::{self, ActiveConversation};
use crate::events::{emit, SessionEvent, EVENT_BUFFER};
use crate::views::ConversationView;
use crate::SyncError;

/// A running value-changed subscription on one user's presence node.
struct PresenceWatch {
    handle: ListenerHandle,
    task: JoinHandle<()>,
}

impl PresenceWatch {
    fn stop(&self) {
        self.handle.detach();
        self.task.abort();
    }
}

/// Session-scoped search-result cache keyed by lowercased query, with
/// FIFO eviction once full.
struct SearchCache {
    cap: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Vec<UserProfile>>,
}

impl SearchCache {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, query: &str) -> Option<Vec<UserProfile>> {
        self.entries.get(query).cloned()
    }

    fn put(&mut self, query: String, results: Vec<UserProfile>) {
        if self.entries.insert(query.clone(), results).is_some() {
            return;
        }
        if self.order.len() >= self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(query);
    }
}

/// One user's chat session.
///
/// All methods are driven by the renderer process; all state mutation
/// and event publication happens on the session's background tasks.
pub struct ChatSession {
    viewer: UserId,
    documents: Arc<dyn DocumentStore>,
    realtime: Arc<dyn RealtimeStore>,
    cache: Arc<CacheStore>,
    directory: UserDirectory,
    config: SyncConfig,
    events: mpsc::Sender<SessionEvent>,
    visible: Arc<AtomicBool>,
    conversation_watch: ConversationWatch,
    active: Option<ActiveConversation>,
    presence_watches: HashMap<UserId, PresenceWatch>,
    search_cache: SearchCache,
}

impl ChatSession {
    /// Start a session for `viewer`: emit the cached conversation list
    /// if one exists, mark the user online, and attach the conversation
    /// snapshot listener. Returns the session and the renderer's event
    /// receiver.
    pub async fn start(
        viewer: UserId,
        documents: Arc<dyn DocumentStore>,
        realtime: Arc<dyn RealtimeStore>,
        cache: Arc<CacheStore>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SyncError> {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let directory = UserDirectory::new();

        if let Some(cached) = cache.get::<Vec<Conversation>>(&keys::conversations(&viewer)) {
            let views = cached
                .iter()
                .map(|c| ConversationView::of(c, &viewer, &directory))
                .collect();
            emit(
                &events,
                SessionEvent::ConversationsUpdated {
                    conversations: views,
                    from_cache: true,
                },
            );
        }

        if let Err(e) = realtime.set_presence(&viewer, true, Timestamp::now()).await {
            warn!(user = %viewer, error = %e, "presence online write failed");
        }

        let conversation_watch = conversations::start(
            viewer.clone(),
            documents.clone(),
            cache.clone(),
            directory.clone(),
            config.clone(),
            events.clone(),
        )
        .await?;

        info!(user = %viewer, "session started");

        let session = Self {
            search_cache: SearchCache::new(config.search_cache_cap),
            viewer,
            documents,
            realtime,
            cache,
            directory,
            config,
            events,
            visible: Arc::new(AtomicBool::new(true)),
            conversation_watch,
            active: None,
            presence_watches: HashMap::new(),
        };
        Ok((session, events_rx))
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Id of the currently open conversation, if any.
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref().map(|a| &a.id)
    }

    /// Open a conversation. The previously active one (if any) is torn
    /// down synchronously before the new activation starts, so no event
    /// from it can land in the new one. An activation failure leaves
    /// the session with no active conversation.
    pub async fn open(&mut self, id: &ConversationId) -> Result<(), SyncError> {
        if let Some(mut previous) = self.active.take() {
            previous.shutdown();
        }

        match engine::activate(
            self.viewer.clone(),
            id,
            self.documents.clone(),
            self.realtime.clone(),
            self.cache.clone(),
            self.directory.clone(),
            self.config.clone(),
            self.events.clone(),
            self.visible.clone(),
        )
        .await
        {
            Ok(active) => {
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                warn!(conversation = %id, error = %e, "conversation activation failed");
                emit(
                    &self.events,
                    SessionEvent::Notice {
                        message: "Could not open conversation".to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Queue a text send on the active conversation.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SyncError> {
        let active = self.active.as_ref().ok_or(SyncError::NoActiveConversation)?;
        active.send_text(text.into());
        Ok(())
    }

    /// Request one older history page for the active conversation.
    pub fn load_older(&self) -> Result<(), SyncError> {
        let active = self.active.as_ref().ok_or(SyncError::NoActiveConversation)?;
        active.load_older();
        Ok(())
    }

    /// Record keyboard activity in the active conversation's composer.
    pub async fn keystroke(&mut self) -> Result<(), SyncError> {
        let active = self.active.as_mut().ok_or(SyncError::NoActiveConversation)?;
        active.typing_writer.keystroke().await;
        Ok(())
    }

    /// Tell the session whether the window is visible. Hidden windows
    /// get `Notify` events for incoming foreign messages.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Case-insensitive prefix search over user display names, cached
    /// per lowercased query for the lifetime of the session. The viewer
    /// is never part of the results.
    pub async fn search_users(&mut self, query: &str) -> Result<Vec<UserProfile>, SyncError> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(hit) = self.search_cache.get(&query) {
            return Ok(hit);
        }

        let mut results = self.documents.search_users(&query).await?;
        results.retain(|p| p.id != self.viewer);
        self.search_cache.put(query, results.clone());
        Ok(results)
    }

    /// Subscribe to one user's presence node. Signals update the
    /// directory copy of the profile and surface as `PresenceChanged`.
    /// Watching an already-watched user is a no-op.
    pub async fn watch_presence(&mut self, user: &UserId) -> Result<(), SyncError> {
        if self.presence_watches.contains_key(user) {
            return Ok(());
        }

        let (handle, mut rx) = self.realtime.watch_presence(user).await?.into_parts();
        let directory = self.directory.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                if let Some(mut profile) = directory.get(&signal.user) {
                    profile.online = signal.online;
                    profile.last_seen = signal.last_seen;
                    directory.insert(profile);
                }
                let last_seen_label = match (signal.online, signal.last_seen) {
                    (true, _) => "Online".to_string(),
                    (false, Some(at)) => time::format_last_seen(at),
                    (false, None) => String::new(),
                };
                emit(
                    &events,
                    SessionEvent::PresenceChanged {
                        user: signal.user,
                        online: signal.online,
                        last_seen: signal.last_seen,
                        last_seen_label,
                    },
                );
            }
        });

        self.presence_watches
            .insert(user.clone(), PresenceWatch { handle, task });
        Ok(())
    }

    /// Drop the presence subscription for `user`, if one exists.
    pub fn unwatch_presence(&mut self, user: &UserId) {
        if let Some(watch) = self.presence_watches.remove(user) {
            watch.stop();
        }
    }

    /// End the session: tear down the active conversation, the
    /// conversation watch, and every presence watch, then mark the
    /// user offline. Consumes the session; the event channel closes
    /// when the last background task stops.
    pub async fn logout(mut self) {
        if let Some(mut active) = self.active.take() {
            active.shutdown();
        }
        self.conversation_watch.stop();
        for watch in self.presence_watches.values() {
            watch.stop();
        }
        self.presence_watches.clear();

        if let Err(e) = self
            .realtime
            .set_presence(&self.viewer, false, Timestamp::now())
            .await
        {
            warn!(user = %self.viewer, error = %e, "presence offline write failed");
        }

        info!(user = %self.viewer, "session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use vitalink_backend::MemoryBackend;
    use vitalink_shared::{Message, MessageBody, MessageId, MessageStatus, Sender};
    use vitalink_store::Database;

    fn conversation(id: &str, participants: &[&str]) -> Conversation {
        Conversation {
            id: ConversationId::new(id),
            participants: participants.iter().map(|p| UserId::new(*p)).collect(),
            ..Conversation::default()
        }
    }

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: UserId::new(id),
            display_name: name.to_string(),
            ..UserProfile::default()
        }
    }

    fn message(id: &str, sender: &str, at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            sender: Sender::User(UserId::new(sender)),
            timestamp: Some(Timestamp::from_millis(at)),
            status: MessageStatus::Sent,
            body: MessageBody::text("hello"),
        }
    }

    async fn session(
        backend: &MemoryBackend,
        viewer: &str,
    ) -> (ChatSession, mpsc::Receiver<SessionEvent>) {
        ChatSession::start(
            UserId::new(viewer),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(CacheStore::new(Database::in_memory().unwrap())),
            SyncConfig {
                confirm_delay: Duration::ZERO,
                ..SyncConfig::default()
            },
        )
        .await
        .expect("session starts")
    }

    /// Receive events until one matches, or fail after a second.
    async fn expect_event<F>(rx: &mut mpsc::Receiver<SessionEvent>, mut matches: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        timeout(Duration::from_secs(1), async {
            loop {
                let event = rx.recv().await.expect("event channel open");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("matching event before timeout")
    }

    /// Drain everything that arrives within `window`.
    async fn drain_for(rx: &mut mpsc::Receiver<SessionEvent>, window: Duration) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match timeout(deadline - tokio::time::Instant::now(), rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                _ => return events,
            }
        }
    }

    #[tokio::test]
    async fn start_delivers_the_conversation_snapshot() {
        let backend = MemoryBackend::new();
        backend
            .create_conversation(&conversation("c1", &["u1", "u2"]))
            .await
            .unwrap();

        let (_session, mut rx) = session(&backend, "u1").await;

        let event = expect_event(&mut rx, |e| {
            matches!(e, SessionEvent::ConversationsUpdated { from_cache: false, .. })
        })
        .await;
        let SessionEvent::ConversationsUpdated { conversations, .. } = event else {
            unreachable!()
        };
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id.as_str(), "c1");
    }

    #[tokio::test]
    async fn send_without_open_conversation_is_an_error() {
        let backend = MemoryBackend::new();
        let (session, _rx) = session(&backend, "u1").await;

        assert!(matches!(
            session.send_text("hi"),
            Err(SyncError::NoActiveConversation)
        ));
        assert!(matches!(
            session.load_older(),
            Err(SyncError::NoActiveConversation)
        ));
    }

    #[tokio::test]
    async fn open_replaces_the_active_conversation() {
        let backend = MemoryBackend::new();
        backend
            .create_conversation(&conversation("c1", &["u1", "u2"]))
            .await
            .unwrap();
        backend
            .create_conversation(&conversation("c2", &["u1", "u3"]))
            .await
            .unwrap();

        let (mut session, _rx) = session(&backend, "u1").await;
        session.open(&ConversationId::new("c1")).await.unwrap();
        assert_eq!(session.active_conversation().unwrap().as_str(), "c1");

        session.open(&ConversationId::new("c2")).await.unwrap();
        assert_eq!(session.active_conversation().unwrap().as_str(), "c2");
    }

    #[tokio::test]
    async fn no_events_leak_from_a_closed_conversation() {
        let backend = MemoryBackend::new();
        backend
            .create_conversation(&conversation("c1", &["u1", "u2"]))
            .await
            .unwrap();
        backend
            .create_conversation(&conversation("c2", &["u1", "u3"]))
            .await
            .unwrap();

        let (mut session, mut rx) = session(&backend, "u1").await;
        session.open(&ConversationId::new("c1")).await.unwrap();
        session.open(&ConversationId::new("c2")).await.unwrap();
        drain_for(&mut rx, Duration::from_millis(100)).await;

        // A live write into the conversation we left.
        RealtimeStore::put_message(
            &backend,
            &ConversationId::new("c1"),
            &message("m1", "u2", 1_000),
        )
        .await
        .unwrap();

        let leaked = drain_for(&mut rx, Duration::from_millis(100)).await;
        assert!(
            !leaked.iter().any(|e| matches!(
                e,
                SessionEvent::MessageAppended { conversation, .. }
                    if conversation.as_str() == "c1"
            )),
            "got events from the closed conversation: {leaked:?}"
        );
    }

    #[tokio::test]
    async fn opening_a_missing_conversation_fails_and_session_survives() {
        let backend = MemoryBackend::new();
        backend
            .create_conversation(&conversation("c1", &["u1", "u2"]))
            .await
            .unwrap();

        let (mut session, _rx) = session(&backend, "u1").await;
        assert!(session.open(&ConversationId::new("ghost")).await.is_err());
        assert!(session.active_conversation().is_none());

        // Still able to open a real one.
        session.open(&ConversationId::new("c1")).await.unwrap();
    }

    #[tokio::test]
    async fn search_results_are_cached_per_query() {
        let backend = MemoryBackend::new();
        backend.put_user(&profile("u2", "Ana")).await.unwrap();

        let (mut session, _rx) = session(&backend, "u1").await;
        let first = session.search_users("an").await.unwrap();
        assert_eq!(first.len(), 1);

        // A user added after the first search is invisible to the same
        // query: the session serves the cached result.
        backend.put_user(&profile("u3", "Anders")).await.unwrap();
        let second = session.search_users("AN ").await.unwrap();
        assert_eq!(second, first);

        let fresh = session.search_users("and").await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id.as_str(), "u3");
    }

    #[tokio::test]
    async fn search_excludes_the_viewer() {
        let backend = MemoryBackend::new();
        backend.put_user(&profile("u1", "Ana")).await.unwrap();
        backend.put_user(&profile("u2", "Anders")).await.unwrap();

        let (mut session, _rx) = session(&backend, "u1").await;
        let results = session.search_users("an").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.as_str(), "u2");
    }

    #[tokio::test]
    async fn presence_watch_emits_changes_until_unwatched() {
        let backend = MemoryBackend::new();
        let (mut session, mut rx) = session(&backend, "u1").await;

        session.watch_presence(&UserId::new("u2")).await.unwrap();
        backend
            .set_presence(&UserId::new("u2"), true, Timestamp::from_millis(1_000))
            .await
            .unwrap();
        let event = expect_event(&mut rx, |e| {
            matches!(e, SessionEvent::PresenceChanged { .. })
        })
        .await;
        assert!(matches!(
            event,
            SessionEvent::PresenceChanged { online: true, .. }
        ));

        session.unwatch_presence(&UserId::new("u2"));
        backend
            .set_presence(&UserId::new("u2"), false, Timestamp::from_millis(2_000))
            .await
            .unwrap();
        let after = drain_for(&mut rx, Duration::from_millis(100)).await;
        assert!(!after
            .iter()
            .any(|e| matches!(e, SessionEvent::PresenceChanged { .. })));
    }

    #[tokio::test]
    async fn logout_marks_the_user_offline() {
        let backend = MemoryBackend::new();
        let (session, _rx) = session(&backend, "u1").await;
        session.logout().await;

        // The presence node replays its current value on attach.
        let (_handle, mut rx) = backend
            .watch_presence(&UserId::new("u1"))
            .await
            .unwrap()
            .into_parts();
        let signal = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!signal.online);
    }

    #[test]
    fn search_cache_evicts_oldest_at_capacity() {
        let mut cache = SearchCache::new(2);
        cache.put("a".into(), vec![]);
        cache.put("b".into(), vec![]);
        cache.put("c".into(), vec![]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }
}

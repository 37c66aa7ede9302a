//! Message synchronization engine.
//!
//! One actor per active conversation. Every mutation of the in-memory
//! message list — optimistic sends, realtime ingestion, pagination —
//! flows through a single task that `select!`s over the command queue,
//! the realtime message events, and the typing events, so concurrent
//! completions apply in a deterministic serial order.
//!
//! States: Idle (no actor) → Loading ([`activate`]) → Live (actor
//! running), with pagination as a single-flight sub-state of Live.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vitalink_backend::{
    BackendError, DocumentStore, ListenerHandle, MessageEvent, RealtimeStore, TypingSignal,
};
use vitalink_shared::{
    Conversation, ConversationId, LastMessage, Message, MessageBody, MessageId, MessageStatus,
    Timestamp, UserId,
};
use vitalink_store::{keys, CacheStore};

use crate::config::SyncConfig;
use crate::directory::UserDirectory;
use crate::events::{emit, SessionEvent};
use crate::typing::{TypingTracker, TypingWriter};
use crate::views::MessageView;
use crate::SyncError;

/// Interval of the staleness sweep over displayed typing flags.
const TYPING_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Commands consumed by the actor. Sends and pagination results loop
/// back through here so their effects serialize with live ingestion.
#[derive(Debug)]
pub(crate) enum ChatCommand {
    Send { text: String },
    LoadOlder,
    SendConfirmed { id: MessageId },
    SendFailed { id: MessageId, reason: String },
    OlderLoaded { result: Result<Vec<Message>, String> },
    Shutdown,
}

/// Handle to the active conversation's actor and listeners, owned by
/// the session. At most one exists per session.
pub(crate) struct ActiveConversation {
    pub id: ConversationId,
    cmd_tx: mpsc::Sender<ChatCommand>,
    message_handle: ListenerHandle,
    typing_handle: ListenerHandle,
    task: JoinHandle<()>,
    pub typing_writer: TypingWriter,
}

impl ActiveConversation {
    /// Detach both listeners and stop the actor. Synchronous: once
    /// this returns, no event from this conversation can reach any
    /// later-activated one.
    pub fn shutdown(&mut self) {
        self.typing_writer.stop();
        self.message_handle.detach();
        self.typing_handle.detach();
        let _ = self.cmd_tx.try_send(ChatCommand::Shutdown);
        self.task.abort();
        info!(conversation = %self.id, "conversation deactivated");
    }

    pub fn send_text(&self, text: String) {
        if self.cmd_tx.try_send(ChatCommand::Send { text }).is_err() {
            warn!(conversation = %self.id, "command queue unavailable, send dropped");
        }
    }

    pub fn load_older(&self) {
        if self.cmd_tx.try_send(ChatCommand::LoadOlder).is_err() {
            warn!(conversation = %self.id, "command queue unavailable, pagination dropped");
        }
    }
}

/// Open a conversation: authoritative load, then live listeners.
///
/// The caller must have shut down any previously active conversation
/// first. A metadata or initial-load failure aborts the activation and
/// leaves no listeners behind.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn activate(
    viewer: UserId,
    id: &ConversationId,
    documents: Arc<dyn DocumentStore>,
    realtime: Arc<dyn RealtimeStore>,
    cache: Arc<CacheStore>,
    directory: UserDirectory,
    config: SyncConfig,
    events: mpsc::Sender<SessionEvent>,
    visible: Arc<AtomicBool>,
) -> Result<ActiveConversation, SyncError> {
    let conversation = documents.get_conversation(id).await?;

    // What the viewer had acknowledged before this activation; the
    // marker advances below, so read it first.
    let last_seen = cache.get::<Timestamp>(&keys::last_seen(id, &viewer));

    // Instant display from cache; purely a UX optimization, the
    // authoritative load below still runs.
    if let Some(cached) = cache.get::<Vec<Message>>(&keys::messages(id)) {
        emit(
            &events,
            SessionEvent::MessagesReplaced {
                conversation: id.clone(),
                messages: cached.iter().map(|m| MessageView::of(m, &viewer)).collect(),
                last_seen,
                from_cache: true,
            },
        );
    }

    if conversation.unread_for(&viewer) > 0 {
        if let Err(e) = documents.reset_unread(id, &viewer).await {
            warn!(conversation = %id, error = %e, "unread reset failed");
        }
    }

    let mut messages = documents.recent_messages(id, config.page_size).await?;
    messages.reverse(); // store returns newest-first; display is chronological

    emit(
        &events,
        SessionEvent::MessagesReplaced {
            conversation: id.clone(),
            messages: messages.iter().map(|m| MessageView::of(m, &viewer)).collect(),
            last_seen,
            from_cache: false,
        },
    );
    cache.set(&keys::messages(id), &messages);
    if let Some(newest) = messages.iter().rev().find_map(|m| m.timestamp) {
        cache.set(&keys::last_seen(id, &viewer), &newest);
    }

    let (message_handle, msg_rx) = realtime.watch_messages(id).await?.into_parts();
    let (typing_handle, typing_rx) = realtime.watch_typing(id).await?.into_parts();

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let typing_writer = TypingWriter::new(
        id.clone(),
        viewer.clone(),
        realtime.clone(),
        config.typing_debounce,
    );

    let engine = Engine {
        typing: TypingTracker::new(viewer.clone(), config.typing_stale_ms),
        conversation,
        viewer,
        documents,
        realtime,
        cache,
        directory,
        config,
        events,
        cmd_tx: cmd_tx.clone(),
        visible,
        messages,
        paginating: false,
        exhausted: false,
    };

    info!(conversation = %id, "conversation activated");

    let task = tokio::spawn(engine.run(cmd_rx, msg_rx, typing_rx));

    Ok(ActiveConversation {
        id: id.clone(),
        cmd_tx,
        message_handle,
        typing_handle,
        task,
        typing_writer,
    })
}

/// The actor state. Only [`Engine::run`] (or a test) may call the
/// handlers; nothing else touches `messages`.
struct Engine {
    conversation: Conversation,
    viewer: UserId,
    documents: Arc<dyn DocumentStore>,
    realtime: Arc<dyn RealtimeStore>,
    cache: Arc<CacheStore>,
    directory: UserDirectory,
    config: SyncConfig,
    events: mpsc::Sender<SessionEvent>,
    cmd_tx: mpsc::Sender<ChatCommand>,
    visible: Arc<AtomicBool>,

    messages: Vec<Message>,
    paginating: bool,
    exhausted: bool,
    typing: TypingTracker,
}

impl Engine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ChatCommand>,
        mut msg_rx: mpsc::Receiver<MessageEvent>,
        mut typing_rx: mpsc::Receiver<TypingSignal>,
    ) {
        let mut sweep = tokio::time::interval(TYPING_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    if matches!(cmd, ChatCommand::Shutdown) {
                        break;
                    }
                    self.handle_command(cmd).await;
                }
                Some(event) = msg_rx.recv() => self.handle_realtime(event).await,
                Some(signal) = typing_rx.recv() => self.handle_typing(&signal),
                _ = sweep.tick() => self.sweep_typing(),
                else => break,
            }
        }
        debug!(conversation = %self.conversation.id, "engine loop ended");
    }

    async fn handle_command(&mut self, cmd: ChatCommand) {
        match cmd {
            ChatCommand::Send { text } => self.handle_send(text),
            ChatCommand::LoadOlder => self.handle_load_older(),
            ChatCommand::SendConfirmed { id } => self.handle_send_confirmed(id),
            ChatCommand::SendFailed { id, reason } => self.handle_send_failed(id, reason),
            ChatCommand::OlderLoaded { result } => self.handle_older_loaded(result),
            ChatCommand::Shutdown => {}
        }
    }

    // -- send -------------------------------------------------------------

    /// Optimistic send: the local entry exists, with `Pending` status,
    /// before any network write starts. Sends are not single-flight;
    /// display order is local append order.
    fn handle_send(&mut self, text: String) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let id = self.realtime.allocate_message_id(&self.conversation.id);
        let message = Message::outgoing(id, self.viewer.clone(), MessageBody::text(trimmed));

        self.messages.push(message.clone());
        emit(
            &self.events,
            SessionEvent::MessageAppended {
                conversation: self.conversation.id.clone(),
                message: MessageView::of(&message, &self.viewer),
            },
        );
        self.persist();

        let realtime = self.realtime.clone();
        let documents = self.documents.clone();
        let conversation = self.conversation.id.clone();
        let cmd_tx = self.cmd_tx.clone();
        let confirm_delay = self.config.confirm_delay;
        tokio::spawn(async move {
            let outcome: Result<(), BackendError> = async {
                // Realtime first: recipients see it with minimum latency.
                realtime.put_message(&conversation, &message).await?;
                documents
                    .apply_send(&conversation, &LastMessage::of(&message))
                    .await?;
                // The durable copy is the system of record for history
                // and pagination; it follows after a short delay.
                tokio::time::sleep(confirm_delay).await;
                let mut durable = message.clone();
                durable.status = MessageStatus::Sent;
                documents.put_message(&conversation, &durable).await?;
                realtime
                    .set_message_status(&conversation, &message.id, MessageStatus::Sent)
                    .await?;
                Ok(())
            }
            .await;

            let cmd = match outcome {
                Ok(()) => ChatCommand::SendConfirmed {
                    id: message.id.clone(),
                },
                Err(e) => ChatCommand::SendFailed {
                    id: message.id.clone(),
                    reason: e.to_string(),
                },
            };
            if cmd_tx.send(cmd).await.is_err() {
                debug!(conversation = %conversation, "conversation closed before send settled");
            }
        });
    }

    fn handle_send_confirmed(&mut self, id: MessageId) {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        message.status.advance(MessageStatus::Sent);
        let view = MessageView::of(message, &self.viewer);
        emit(
            &self.events,
            SessionEvent::MessageUpdated {
                conversation: self.conversation.id.clone(),
                message: view,
            },
        );
        self.persist();
    }

    /// Roll back the optimistic entry: no silent ghost messages.
    fn handle_send_failed(&mut self, id: MessageId, reason: String) {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        if self.messages.len() == before {
            return;
        }
        warn!(conversation = %self.conversation.id, message = %id, error = %reason, "send failed, rolled back");
        emit(
            &self.events,
            SessionEvent::SendFailed {
                conversation: self.conversation.id.clone(),
                message: id,
                reason,
            },
        );
        emit(
            &self.events,
            SessionEvent::Notice {
                message: "Message could not be sent".to_string(),
            },
        );
        self.persist();
    }

    // -- pagination -------------------------------------------------------

    /// Single-flight, scoped to this conversation's actor: a trigger
    /// while a fetch is outstanding is dropped, not queued.
    fn handle_load_older(&mut self) {
        if self.paginating {
            debug!(conversation = %self.conversation.id, "pagination already in flight");
            return;
        }
        if self.exhausted {
            return;
        }
        let Some(before) = self.messages.iter().find_map(|m| m.timestamp) else {
            return;
        };
        self.paginating = true;

        let documents = self.documents.clone();
        let conversation = self.conversation.id.clone();
        let limit = self.config.page_size;
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = documents
                .messages_before(&conversation, before, limit)
                .await
                .map_err(|e| e.to_string());
            let _ = cmd_tx.send(ChatCommand::OlderLoaded { result }).await;
        });
    }

    fn handle_older_loaded(&mut self, result: Result<Vec<Message>, String>) {
        self.paginating = false;
        match result {
            Ok(batch) if batch.is_empty() => {
                // Terminal, and not an error: there is nothing above.
                self.exhausted = true;
                emit(
                    &self.events,
                    SessionEvent::HistoryExhausted {
                        conversation: self.conversation.id.clone(),
                    },
                );
            }
            Ok(mut batch) => {
                batch.reverse(); // newest-first from the store
                let views = batch
                    .iter()
                    .map(|m| MessageView::of(m, &self.viewer))
                    .collect();
                batch.append(&mut self.messages);
                self.messages = batch;
                emit(
                    &self.events,
                    SessionEvent::MessagesPrepended {
                        conversation: self.conversation.id.clone(),
                        messages: views,
                    },
                );
                self.persist();
            }
            Err(reason) => {
                // Existing state stays untouched; no partial prepend.
                warn!(conversation = %self.conversation.id, error = %reason, "pagination failed");
                emit(
                    &self.events,
                    SessionEvent::Notice {
                        message: "Could not load older messages".to_string(),
                    },
                );
            }
        }
    }

    // -- realtime ingestion -----------------------------------------------

    async fn handle_realtime(&mut self, event: MessageEvent) {
        match event {
            MessageEvent::Added(incoming) => {
                if let Some(position) = self.messages.iter().position(|m| m.id == incoming.id) {
                    // Reconciles the optimistic placeholder (or a
                    // duplicate delivery) in place.
                    self.merge_at(position, incoming);
                } else {
                    self.messages.push(incoming.clone());
                    emit(
                        &self.events,
                        SessionEvent::MessageAppended {
                            conversation: self.conversation.id.clone(),
                            message: MessageView::of(&incoming, &self.viewer),
                        },
                    );
                    self.persist();
                    self.on_foreign_message(&incoming);
                }
            }
            MessageEvent::Changed(incoming) => {
                match self.messages.iter().position(|m| m.id == incoming.id) {
                    Some(position) => self.merge_at(position, incoming),
                    None => {
                        // A change can outrun its add; the durable
                        // snapshot corrects this later.
                        debug!(
                            conversation = %self.conversation.id,
                            message = %incoming.id,
                            "change for unknown message, ignoring"
                        );
                    }
                }
            }
        }
    }

    /// Overwrite the entry in place (length and position unchanged),
    /// never letting the status regress.
    fn merge_at(&mut self, position: usize, incoming: Message) {
        let existing = &mut self.messages[position];
        let mut status = existing.status;
        status.advance(incoming.status);
        *existing = incoming;
        existing.status = status;

        let view = MessageView::of(&self.messages[position], &self.viewer);
        emit(
            &self.events,
            SessionEvent::MessageUpdated {
                conversation: self.conversation.id.clone(),
                message: view,
            },
        );
        self.persist();
    }

    /// Side effects for a newly-arrived message from someone else:
    /// notification when the window is hidden, and — since this
    /// conversation is the active one — an idempotent mark-read
    /// write-through plus a last-seen advance.
    fn on_foreign_message(&mut self, message: &Message) {
        if message.sender.is_user(&self.viewer) {
            return;
        }

        if !self.visible.load(Ordering::SeqCst) {
            let title = message
                .sender
                .user_id()
                .and_then(|id| self.directory.display_name(id))
                .unwrap_or_else(|| "New message".to_string());
            emit(
                &self.events,
                SessionEvent::Notify {
                    conversation: self.conversation.id.clone(),
                    title,
                    body: message.body.preview(),
                },
            );
        }

        if let Some(ts) = message.timestamp {
            self.cache
                .set(&keys::last_seen(&self.conversation.id, &self.viewer), &ts);
        }

        let realtime = self.realtime.clone();
        let documents = self.documents.clone();
        let conversation = self.conversation.id.clone();
        let id = message.id.clone();
        tokio::spawn(async move {
            if let Err(e) = realtime
                .set_message_status(&conversation, &id, MessageStatus::Read)
                .await
            {
                warn!(conversation = %conversation, error = %e, "live read receipt failed");
            }
            if let Err(e) = documents
                .set_message_status(&conversation, &id, MessageStatus::Read)
                .await
            {
                warn!(conversation = %conversation, error = %e, "durable read receipt failed");
            }
        });
    }

    // -- typing -----------------------------------------------------------

    fn handle_typing(&mut self, signal: &TypingSignal) {
        if self.typing.observe(signal, Timestamp::now()) {
            self.emit_typing();
        }
    }

    fn sweep_typing(&mut self) {
        if self.typing.sweep(Timestamp::now()) {
            self.emit_typing();
        }
    }

    fn emit_typing(&self) {
        emit(
            &self.events,
            SessionEvent::TypingChanged {
                conversation: self.conversation.id.clone(),
                users: self.typing.users(),
            },
        );
    }

    // -- persistence ------------------------------------------------------

    fn persist(&self) {
        self.cache
            .set(&keys::messages(&self.conversation.id), &self.messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;
    use vitalink_backend::MemoryBackend;
    use vitalink_shared::Sender;
    use vitalink_store::Database;

    const CONV: &str = "c1";
    const VIEWER: &str = "u1";
    const PEER: &str = "u2";

    fn foreign(id: &str, at: i64, text: &str) -> Message {
        Message {
            id: MessageId::new(id),
            sender: Sender::User(UserId::new(PEER)),
            timestamp: Some(Timestamp::from_millis(at)),
            status: MessageStatus::Sent,
            body: MessageBody::text(text),
        }
    }

    struct Harness {
        engine: Engine,
        cmd_rx: Receiver<ChatCommand>,
        events_rx: Receiver<SessionEvent>,
        backend: MemoryBackend,
    }

    impl Harness {
        async fn new() -> Self {
            let backend = MemoryBackend::new();
            backend
                .create_conversation(&Conversation {
                    id: ConversationId::new(CONV),
                    participants: vec![UserId::new(VIEWER), UserId::new(PEER)],
                    ..Conversation::default()
                })
                .await
                .unwrap();

            let documents: Arc<dyn DocumentStore> = Arc::new(backend.clone());
            let realtime: Arc<dyn RealtimeStore> = Arc::new(backend.clone());
            let conversation = documents
                .get_conversation(&ConversationId::new(CONV))
                .await
                .unwrap();

            let (events_tx, events_rx) = mpsc::channel(256);
            let (cmd_tx, cmd_rx) = mpsc::channel(64);
            let config = SyncConfig {
                confirm_delay: Duration::ZERO,
                ..SyncConfig::default()
            };

            let engine = Engine {
                typing: TypingTracker::new(UserId::new(VIEWER), config.typing_stale_ms),
                conversation,
                viewer: UserId::new(VIEWER),
                documents,
                realtime,
                cache: Arc::new(CacheStore::new(Database::in_memory().unwrap())),
                directory: UserDirectory::new(),
                config,
                events: events_tx,
                cmd_tx,
                visible: Arc::new(AtomicBool::new(true)),
                messages: Vec::new(),
                paginating: false,
                exhausted: false,
            };

            Self {
                engine,
                cmd_rx,
                events_rx,
                backend,
            }
        }

        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events_rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[tokio::test]
    async fn child_added_dedupes_by_id_in_first_seen_order() {
        let mut h = Harness::new().await;
        h.engine.handle_realtime(MessageEvent::Added(foreign("m1", 1_000, "a"))).await;
        h.engine.handle_realtime(MessageEvent::Added(foreign("m2", 2_000, "b"))).await;
        h.engine
            .handle_realtime(MessageEvent::Added(foreign("m1", 1_000, "a-edited")))
            .await;

        assert_eq!(h.engine.messages.len(), 2);
        assert_eq!(h.engine.messages[0].id.as_str(), "m1");
        assert_eq!(h.engine.messages[0].body, MessageBody::text("a-edited"));
        assert_eq!(h.engine.messages[1].id.as_str(), "m2");
    }

    #[tokio::test]
    async fn child_changed_for_unknown_id_is_ignored() {
        let mut h = Harness::new().await;
        h.engine
            .handle_realtime(MessageEvent::Changed(foreign("ghost", 1_000, "x")))
            .await;
        assert!(h.engine.messages.is_empty());
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn change_never_regresses_status() {
        let mut h = Harness::new().await;
        let mut read = foreign("m1", 1_000, "a");
        read.status = MessageStatus::Read;
        h.engine.handle_realtime(MessageEvent::Added(read)).await;

        let mut sent = foreign("m1", 1_000, "a");
        sent.status = MessageStatus::Sent;
        h.engine.handle_realtime(MessageEvent::Changed(sent)).await;

        assert_eq!(h.engine.messages[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn empty_and_whitespace_sends_are_noops() {
        let mut h = Harness::new().await;
        h.engine.handle_command(ChatCommand::Send { text: String::new() }).await;
        h.engine
            .handle_command(ChatCommand::Send {
                text: "   ".to_string(),
            })
            .await;

        assert!(h.engine.messages.is_empty());
        assert!(h.drain_events().is_empty());
        // No pipeline was spawned, so nothing ever settles.
        tokio::task::yield_now().await;
        assert!(h.cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_appends_pending_before_any_backend_response() {
        let mut h = Harness::new().await;
        h.engine
            .handle_command(ChatCommand::Send {
                text: "hello".to_string(),
            })
            .await;

        assert_eq!(h.engine.messages.len(), 1);
        let message = &h.engine.messages[0];
        assert_eq!(message.status, MessageStatus::Pending);
        assert!(message.sender.is_user(&UserId::new(VIEWER)));
        assert_eq!(message.body, MessageBody::text("hello"));
        assert!(matches!(
            h.drain_events().first(),
            Some(SessionEvent::MessageAppended { .. })
        ));
    }

    #[tokio::test]
    async fn confirmed_send_advances_to_sent_and_updates_unread() {
        let mut h = Harness::new().await;
        h.engine
            .handle_command(ChatCommand::Send {
                text: "hello".to_string(),
            })
            .await;

        let cmd = h.cmd_rx.recv().await.expect("pipeline settles");
        assert!(matches!(cmd, ChatCommand::SendConfirmed { .. }));
        h.engine.handle_command(cmd).await;

        assert_eq!(h.engine.messages[0].status, MessageStatus::Sent);

        let conversation = h
            .backend
            .get_conversation(&ConversationId::new(CONV))
            .await
            .unwrap();
        assert_eq!(conversation.unread_for(&UserId::new(PEER)), 1);
        assert_eq!(conversation.unread_for(&UserId::new(VIEWER)), 0);
    }

    #[tokio::test]
    async fn failed_send_rolls_back_the_optimistic_entry() {
        let mut h = Harness::new().await;
        h.backend.set_fail_writes(true).await;

        h.engine
            .handle_command(ChatCommand::Send {
                text: "hello".to_string(),
            })
            .await;
        assert_eq!(h.engine.messages.len(), 1);

        let cmd = h.cmd_rx.recv().await.expect("pipeline settles");
        assert!(matches!(cmd, ChatCommand::SendFailed { .. }));
        h.engine.handle_command(cmd).await;

        assert!(h.engine.messages.is_empty());
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::SendFailed { .. })));
    }

    #[tokio::test]
    async fn pagination_is_single_flight() {
        let mut h = Harness::new().await;
        for n in 0..3 {
            DocumentStore::put_message(
                &h.backend,
                &ConversationId::new(CONV),
                &foreign(&format!("old{n}"), 1_000 + n, "x"),
            )
            .await
            .unwrap();
        }
        h.engine.messages = vec![foreign("m9", 9_000, "latest")];

        h.engine.handle_command(ChatCommand::LoadOlder).await;
        h.engine.handle_command(ChatCommand::LoadOlder).await;
        assert!(h.engine.paginating);

        let first = h.cmd_rx.recv().await.expect("one fetch settles");
        assert!(matches!(first, ChatCommand::OlderLoaded { .. }));
        h.engine.handle_command(first).await;
        assert_eq!(h.engine.messages.len(), 4);

        // The second trigger was dropped, not queued.
        tokio::task::yield_now().await;
        assert!(h.cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn older_pages_prepend_in_chronological_order() {
        let mut h = Harness::new().await;
        h.engine.messages = vec![foreign("m9", 9_000, "latest")];
        h.engine.paginating = true;

        h.engine
            .handle_command(ChatCommand::OlderLoaded {
                result: Ok(vec![foreign("m2", 2_000, "b"), foreign("m1", 1_000, "a")]),
            })
            .await;

        let order: Vec<&str> = h.engine.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m9"]);
        assert!(!h.engine.paginating);
    }

    #[tokio::test]
    async fn empty_page_is_terminal_and_leaves_state_untouched() {
        let mut h = Harness::new().await;
        h.engine.messages = vec![foreign("m9", 9_000, "latest")];
        let before = h.engine.messages.clone();
        h.engine.paginating = true;

        h.engine
            .handle_command(ChatCommand::OlderLoaded { result: Ok(vec![]) })
            .await;

        assert_eq!(h.engine.messages, before);
        assert!(h.engine.exhausted);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::HistoryExhausted { .. })));

        // Exhausted conversations never query again.
        h.engine.handle_command(ChatCommand::LoadOlder).await;
        assert!(!h.engine.paginating);
    }

    #[tokio::test]
    async fn pagination_failure_keeps_existing_state() {
        let mut h = Harness::new().await;
        h.engine.messages = vec![foreign("m9", 9_000, "latest")];
        let before = h.engine.messages.clone();
        h.engine.paginating = true;

        h.engine
            .handle_command(ChatCommand::OlderLoaded {
                result: Err("offline".to_string()),
            })
            .await;

        assert_eq!(h.engine.messages, before);
        assert!(!h.engine.exhausted);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Notice { .. })));
    }

    #[tokio::test]
    async fn foreign_message_while_hidden_raises_notification() {
        let mut h = Harness::new().await;
        h.engine.visible.store(false, Ordering::SeqCst);

        h.engine
            .handle_realtime(MessageEvent::Added(foreign("m1", 1_000, "hi there")))
            .await;

        let events = h.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Notify { body, .. } if body == "hi there")));
    }

    #[tokio::test]
    async fn foreign_message_in_active_conversation_is_marked_read() {
        let mut h = Harness::new().await;
        let message = foreign("m1", 1_000, "hi");
        DocumentStore::put_message(&h.backend, &ConversationId::new(CONV), &message)
            .await
            .unwrap();

        h.engine.handle_realtime(MessageEvent::Added(message)).await;

        // The write-through is spawned; give it a moment to land.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = h
            .backend
            .recent_messages(&ConversationId::new(CONV), 10)
            .await
            .unwrap();
        assert_eq!(history[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn own_message_does_not_notify_or_mark_read() {
        let mut h = Harness::new().await;
        h.engine.visible.store(false, Ordering::SeqCst);

        let mut own = foreign("m1", 1_000, "mine");
        own.sender = Sender::User(UserId::new(VIEWER));
        h.engine.handle_realtime(MessageEvent::Added(own)).await;

        assert!(!h
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Notify { .. })));
    }

    #[tokio::test]
    async fn activation_reports_the_prior_last_seen_marker() {
        let backend = MemoryBackend::new();
        backend
            .create_conversation(&Conversation {
                id: ConversationId::new(CONV),
                participants: vec![UserId::new(VIEWER), UserId::new(PEER)],
                ..Conversation::default()
            })
            .await
            .unwrap();
        for (n, at) in [(1, 1_000), (2, 2_000)] {
            DocumentStore::put_message(
                &backend,
                &ConversationId::new(CONV),
                &foreign(&format!("m{n}"), at, "x"),
            )
            .await
            .unwrap();
        }

        let cache = Arc::new(CacheStore::new(Database::in_memory().unwrap()));
        let marker = keys::last_seen(&ConversationId::new(CONV), &UserId::new(VIEWER));
        cache.set(&marker, &Timestamp::from_millis(1_000));

        let (events_tx, mut events_rx) = mpsc::channel(256);
        let mut active = activate(
            UserId::new(VIEWER),
            &ConversationId::new(CONV),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            cache.clone(),
            UserDirectory::new(),
            SyncConfig::default(),
            events_tx,
            Arc::new(AtomicBool::new(true)),
        )
        .await
        .unwrap();

        // The authoritative load reports where the unread divider goes.
        let mut reported = None;
        while let Ok(event) = events_rx.try_recv() {
            if let SessionEvent::MessagesReplaced {
                from_cache: false,
                last_seen,
                ..
            } = event
            {
                reported = Some(last_seen);
            }
        }
        assert_eq!(reported, Some(Some(Timestamp::from_millis(1_000))));

        // Everything loaded counts as acknowledged from here on.
        assert_eq!(
            cache.get::<Timestamp>(&marker),
            Some(Timestamp::from_millis(2_000))
        );
        active.shutdown();
    }

    #[tokio::test]
    async fn typing_signals_update_and_sweep() {
        let mut h = Harness::new().await;
        let now = Timestamp::now();
        h.engine.handle_typing(&TypingSignal {
            user: UserId::new(PEER),
            is_typing: true,
            at: now,
        });
        assert!(h.drain_events().iter().any(
            |e| matches!(e, SessionEvent::TypingChanged { users, .. } if users.len() == 1)
        ));

        h.engine.handle_typing(&TypingSignal {
            user: UserId::new(PEER),
            is_typing: false,
            at: now,
        });
        assert!(h.drain_events().iter().any(
            |e| matches!(e, SessionEvent::TypingChanged { users, .. } if users.is_empty())
        ));
    }
}

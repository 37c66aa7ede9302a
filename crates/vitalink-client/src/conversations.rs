//! Conversation-list synchronization.
//!
//! One standing snapshot subscription per session. Every emission is a
//! full replacement set of raw documents: normalize, sort, publish,
//! persist, and prefetch the profiles of any participant we have not
//! seen yet.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vitalink_backend::{ConversationEvent, DocumentStore, ListenerHandle};
use vitalink_shared::{Conversation, UserId};
use vitalink_store::{keys, CacheStore};

use crate::config::SyncConfig;
use crate::directory::UserDirectory;
use crate::events::{emit, SessionEvent};
use crate::views::ConversationView;
use crate::SyncError;

/// A running conversation-list subscription. Stopping is synchronous
/// and total: the listener detaches and the consuming task stops.
pub(crate) struct ConversationWatch {
    handle: ListenerHandle,
    task: JoinHandle<()>,
}

impl ConversationWatch {
    pub fn stop(&self) {
        self.handle.detach();
        self.task.abort();
    }
}

/// Sort for the conversation list: conversations with unread messages
/// first, then most recent activity first. `sort_by` is stable, so
/// ties keep their prior order.
pub(crate) fn sort_conversations(list: &mut [Conversation], viewer: &UserId) {
    list.sort_by(|a, b| {
        let a_unread = a.unread_for(viewer) > 0;
        let b_unread = b.unread_for(viewer) > 0;
        b_unread
            .cmp(&a_unread)
            .then_with(|| b.last_message_at.cmp(&a.last_message_at))
    });
}

/// Attach the snapshot listener for `viewer` and spawn its consuming
/// loop. The caller owns the returned watch; starting a new one must
/// stop the old one first.
pub(crate) async fn start(
    viewer: UserId,
    documents: Arc<dyn DocumentStore>,
    cache: Arc<CacheStore>,
    directory: UserDirectory,
    config: SyncConfig,
    events: mpsc::Sender<SessionEvent>,
) -> Result<ConversationWatch, SyncError> {
    let subscription = documents.watch_conversations(&viewer).await?;
    let (handle, rx) = subscription.into_parts();

    info!(user = %viewer, "conversation listener attached");

    let task = tokio::spawn(listen(viewer, documents, cache, directory, config, events, rx));

    Ok(ConversationWatch { handle, task })
}

async fn listen(
    viewer: UserId,
    documents: Arc<dyn DocumentStore>,
    cache: Arc<CacheStore>,
    directory: UserDirectory,
    config: SyncConfig,
    events: mpsc::Sender<SessionEvent>,
    mut rx: mpsc::Receiver<ConversationEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ConversationEvent::Snapshot(docs) => {
                let total = docs.len();
                let mut conversations: Vec<Conversation> =
                    docs.iter().filter_map(Conversation::from_document).collect();
                if conversations.len() < total {
                    warn!(
                        dropped = total - conversations.len(),
                        "snapshot contained malformed conversation documents"
                    );
                }

                sort_conversations(&mut conversations, &viewer);

                let views: Vec<ConversationView> = conversations
                    .iter()
                    .map(|c| ConversationView::of(c, &viewer, &directory))
                    .collect();
                emit(
                    &events,
                    SessionEvent::ConversationsUpdated {
                        conversations: views,
                        from_cache: false,
                    },
                );

                cache.set(&keys::conversations(&viewer), &conversations);

                let participants: Vec<UserId> = conversations
                    .iter()
                    .flat_map(|c| c.participants.iter().cloned())
                    .filter(|p| p != &viewer)
                    .collect();
                directory
                    .prefetch(participants, &cache, &documents, config.prefetch_chunk)
                    .await;
            }
            ConversationEvent::Error(reason) => {
                // Recoverable: keep whatever list is displayed, stop
                // the spinner, tell the user.
                warn!(error = %reason, "conversation subscription error");
                emit(
                    &events,
                    SessionEvent::Notice {
                        message: "Could not load conversations".to_string(),
                    },
                );
                emit(&events, SessionEvent::ConversationsLoadFailed { reason });
            }
        }
    }
    debug!(user = %viewer, "conversation listener loop ended");
}

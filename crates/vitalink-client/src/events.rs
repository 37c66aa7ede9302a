//! Events published to the renderer.
//!
//! The renderer is a pure consumer: it owns the receiving half of the
//! session's event channel and re-renders from these payloads. All
//! synchronization state stays inside the engine.

use serde::Serialize;
use tokio::sync::mpsc;

use vitalink_shared::{ConversationId, MessageId, Timestamp, UserId};

use crate::views::{ConversationView, MessageView};

/// Buffer size for the session event channel.
pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The sorted conversation list changed.
    ConversationsUpdated {
        conversations: Vec<ConversationView>,
        from_cache: bool,
    },
    /// The conversation subscription failed; the list shown is the
    /// last known one and loading should stop.
    ConversationsLoadFailed { reason: String },

    /// The active conversation's message window was replaced
    /// wholesale (activation, or the authoritative load after a cached
    /// fast path). `last_seen` is the newest timestamp the viewer had
    /// acknowledged before this activation; the renderer places the
    /// unread divider above the first message newer than it.
    MessagesReplaced {
        conversation: ConversationId,
        messages: Vec<MessageView>,
        last_seen: Option<Timestamp>,
        from_cache: bool,
    },
    /// One message was appended at the end.
    MessageAppended {
        conversation: ConversationId,
        message: MessageView,
    },
    /// An existing message changed in place (same position).
    MessageUpdated {
        conversation: ConversationId,
        message: MessageView,
    },
    /// Older history was prepended at the front.
    MessagesPrepended {
        conversation: ConversationId,
        messages: Vec<MessageView>,
    },
    /// No older history exists. Terminal per conversation; not an
    /// error.
    HistoryExhausted { conversation: ConversationId },

    /// An optimistic send failed and its entry was rolled back.
    SendFailed {
        conversation: ConversationId,
        message: MessageId,
        reason: String,
    },

    /// The set of currently-typing participants changed.
    TypingChanged {
        conversation: ConversationId,
        users: Vec<UserId>,
    },
    /// A watched user's presence changed.
    PresenceChanged {
        user: UserId,
        online: bool,
        last_seen: Option<Timestamp>,
        last_seen_label: String,
    },

    /// Play the notification sound and raise an OS notification: a
    /// foreign message arrived while the window was hidden.
    Notify {
        conversation: ConversationId,
        title: String,
        body: String,
    },
    /// Non-blocking notice for a transient failure.
    Notice { message: String },
}

/// Best-effort event emission. A full or closed channel is logged and
/// dropped; the engine never blocks on the renderer.
pub fn emit(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = tx.try_send(event) {
        tracing::warn!(error = %e, "failed to emit session event");
    }
}

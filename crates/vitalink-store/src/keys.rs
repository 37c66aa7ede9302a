//! Logical cache key builders.
//!
//! These are the un-namespaced keys; [`CacheStore`](crate::CacheStore)
//! prepends the `chat_<version>_` namespace on every access.

use vitalink_shared::{ConversationId, UserId};

/// The viewer's conversation list.
pub fn conversations(user: &UserId) -> String {
    format!("conversations_{user}")
}

/// The loaded message window of one conversation.
pub fn messages(conversation: &ConversationId) -> String {
    format!("messages_{conversation}")
}

/// One cached user profile.
pub fn user(id: &UserId) -> String {
    format!("user_{id}")
}

/// Last-seen marker: the newest message timestamp the viewer has
/// acknowledged in a conversation.
pub fn last_seen(conversation: &ConversationId, user: &UserId) -> String {
    format!("last_seen_{conversation}_{user}")
}

//! View structs handed to the renderer.
//!
//! Serializable with camelCase field names so they can cross an IPC or
//! JSON boundary untouched. Formatting happens here: malformed
//! timestamps become empty labels, titles resolve through the user
//! directory, previews come from the message body.

use serde::Serialize;

use vitalink_shared::{
    time, Conversation, ConversationId, Message, MessageBody, MessageId, MessageStatus, UserId,
};

use crate::directory::UserDirectory;

/// One message, ready to render.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: String,
    pub is_mine: bool,
    pub is_system: bool,
    pub status: MessageStatus,
    /// Clock-time label, empty when the timestamp was malformed.
    pub time_label: String,
    /// Day separator label for the first message of a day.
    pub day_label: String,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl MessageView {
    pub fn of(message: &Message, viewer: &UserId) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender.as_wire().to_string(),
            is_mine: message.sender.is_user(viewer),
            is_system: message.sender.user_id().is_none(),
            status: message.status,
            time_label: message.timestamp.map(time::format_time).unwrap_or_default(),
            day_label: message.timestamp.map(time::format_day).unwrap_or_default(),
            body: message.body.clone(),
        }
    }
}

/// One conversation-list row, ready to render.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: ConversationId,
    pub title: String,
    pub is_group: bool,
    pub participants: Vec<UserId>,
    pub unread: u32,
    pub last_message: Option<String>,
    /// Relative label for the last message, empty when absent or
    /// malformed.
    pub last_message_label: String,
}

impl ConversationView {
    pub fn of(conversation: &Conversation, viewer: &UserId, directory: &UserDirectory) -> Self {
        let title = match (&conversation.name, conversation.peer_of(viewer)) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(peer)) => directory
                .display_name(peer)
                .unwrap_or_else(|| peer.to_string()),
            _ => conversation.id.to_string(),
        };

        Self {
            id: conversation.id.clone(),
            title,
            is_group: conversation.is_group,
            participants: conversation.participants.clone(),
            unread: conversation.unread_for(viewer),
            last_message: conversation.last_message.clone(),
            last_message_label: conversation
                .last_message_at
                .map(time::format_relative)
                .unwrap_or_default(),
        }
    }
}

//! # vitalink-shared
//!
//! Domain model shared by every Vitalink crate: identifiers, the
//! conversation/message shapes mirrored from the hosted backends, and
//! the normalized [`Timestamp`](time::Timestamp) type that all internal
//! logic operates on.

pub mod constants;
pub mod time;
pub mod types;

pub use time::Timestamp;
pub use types::{
    Conversation, ConversationId, LastMessage, Message, MessageBody, MessageId, MessageStatus,
    Sender, UserId, UserProfile,
};

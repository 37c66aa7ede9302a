//! # vitalink-backend
//!
//! The consumed contract of the two hosted backends: the durable
//! document store (system of record for conversations and message
//! history) and the low-latency realtime store (live delivery, typing,
//! presence). Both are expressed as traits whose listeners are typed
//! mpsc channels with synchronously detachable handles, so the client
//! core never touches vendor callbacks.
//!
//! [`MemoryBackend`] implements both traits in-process and backs the
//! test suite.

pub mod document;
pub mod error;
pub mod handle;
pub mod memory;
pub mod realtime;

pub use document::{ConversationEvent, DocumentStore};
pub use error::{BackendError, BackendResult};
pub use handle::{ListenerHandle, Subscription, SubscriptionSender};
pub use memory::MemoryBackend;
pub use realtime::{MessageEvent, PresenceSignal, RealtimeStore, TypingSignal};

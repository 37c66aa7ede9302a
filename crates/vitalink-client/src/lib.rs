//! # vitalink-client
//!
//! The client-side chat synchronization core: an explicit session
//! context that owns every listener, a per-conversation actor that
//! serializes all message-state mutations, a lazily-populated user
//! directory, and debounced typing / per-user presence signaling.
//!
//! The renderer consumes [`SessionEvent`]s from the channel returned by
//! [`ChatSession::start`]; it never mutates synchronization state.

pub mod config;
pub mod conversations;
pub mod directory;
pub mod engine;
pub mod events;
pub mod session;
pub mod typing;
pub mod views;

mod error;

pub use config::SyncConfig;
pub use directory::UserDirectory;
pub use error::SyncError;
pub use events::SessionEvent;
pub use session::ChatSession;
pub use views::{ConversationView, MessageView};

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise tracing for embedders that do not bring their own
/// subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("vitalink_client=debug,vitalink_backend=debug,vitalink_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

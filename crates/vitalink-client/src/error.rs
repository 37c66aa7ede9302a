use thiserror::Error;

use vitalink_backend::BackendError;

/// Errors surfaced by the session API. All are recoverable: the failed
/// operation is abandoned, the session stays usable.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("no active conversation")]
    NoActiveConversation,
}

use thiserror::Error;

/// Errors surfaced by the backend stores.
///
/// All of these are transient from the session's point of view: the
/// failed operation is reported and abandoned, the session stays up.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("listener setup failed: {0}")]
    Listener(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the backend crates.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

//! Engine error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the ledger, controller and engine.
///
/// Malformed frames are not represented here: they are recovered inside the
/// controller (see [`crate::frame::ParseError`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure or abnormal close. The tail item is left
    /// incomplete so a later resume can pick it up.
    #[error("transport error: {0}")]
    Transport(String),

    /// Explicit error event or sentinel from the far end.
    #[error("server signaled error: {0}")]
    ServerSignaled(String),

    /// Caller error that would corrupt the ledger if allowed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// No item with this id in the ledger.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// The credential provider has no credentials.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Resume requested but the ledger tail is not an incomplete produced item.
    #[error("nothing to resume")]
    NothingToResume,

    /// A connection is already connecting or streaming.
    #[error("stream busy: {0}")]
    Busy(String),

    /// Endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Durable store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Persisted data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure is recoverable by resuming or retrying the query.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ServerSignaled(_))
    }
}

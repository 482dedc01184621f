//! Error types for the Courier event loop.

use crate::source::SourceId;

/// Result type alias for event loop operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the event loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The loop has been finalized and no longer accepts sources or events.
    #[error("the event loop has been finalized")]
    Finalized,

    /// The event source ID is invalid or has already been deleted.
    #[error("invalid or deleted event source {0:?}")]
    UnknownSource(SourceId),
}

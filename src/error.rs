use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by board, registry and program operations.
#[derive(Debug, Error)]
pub enum BoardError {
    /// No board with this id is known to the registry.
    #[error("board not found: {0}")]
    NotFound(String),

    /// The board is offline, so no command can reach it.
    #[error("board unavailable: {0} is offline")]
    Unavailable(String),

    /// Unknown action for this board type, or program/device type mismatch.
    #[error("incompatible: {0}")]
    Incompatible(String),

    /// Pin index not exposed by the board's transport.
    #[error("pin {pin} not found on board {board}")]
    PinNotFound { board: String, pin: u8 },

    /// Out-of-range pin value or malformed command parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unrecognized variant tag passed to the board factory.
    #[error("board type not found: {0}")]
    TypeNotFound(String),

    /// Attempt to create a record whose id already exists.
    #[error("duplicate board: {0}")]
    Duplicate(String),

    /// Architecture name outside the built-in pin maps.
    #[error("architecture not supported: {0}")]
    ArchitectureUnsupported(String),

    /// A program (or engine) is already running.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Writing to a live transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for BoardError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => BoardError::NotFound(id),
            StorageError::Duplicate(id) => BoardError::Duplicate(id),
            other => BoardError::Storage(other),
        }
    }
}

impl BoardError {
    /// HTTP-like status code used when reporting the error to a remote client.
    pub fn status_code(&self) -> u16 {
        match self {
            BoardError::NotFound(_) | BoardError::PinNotFound { .. } | BoardError::TypeNotFound(_) => 404,
            BoardError::Unavailable(_) => 503,
            BoardError::Conflict(_) | BoardError::Duplicate(_) => 409,
            BoardError::Incompatible(_)
            | BoardError::InvalidArgument(_)
            | BoardError::ArchitectureUnsupported(_) => 400,
            BoardError::Transport(_) | BoardError::Storage(_) => 500,
        }
    }
}

pub type Result<T, E = BoardError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_onto_taxonomy() {
        let e: BoardError = StorageError::Duplicate("abc".into()).into();
        assert!(matches!(e, BoardError::Duplicate(ref id) if id == "abc"));
        let e: BoardError = StorageError::NotFound("abc".into()).into();
        assert_eq!(e.status_code(), 404);
        let e: BoardError = StorageError::Io(std::io::Error::other("disk")).into();
        assert_eq!(e.status_code(), 500, "persistence failures are server errors");
    }

    #[test]
    fn validation_errors_are_client_errors() {
        assert_eq!(BoardError::InvalidArgument("x".into()).status_code(), 400);
        assert_eq!(BoardError::Conflict("running".into()).status_code(), 409);
        assert_eq!(BoardError::Unavailable("a".into()).status_code(), 503);
    }
}

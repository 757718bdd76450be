/// Errors from storage engine operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing store or filesystem root cannot be reached or used.
    #[error("connection error: {0}")]
    Connection(String),

    /// No entry carries the requested call reference.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// The byte stream of an upload could not be opened or written.
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// A persisted record does not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// No unique call reference could be allocated within the attempt budget.
    #[error("call reference space exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },

    /// A lazy reader was used before `open` was called.
    #[error("reader has not been opened")]
    NotOpened,

    /// The entry carries no reader, either because it was never requested
    /// from an engine or because its reader was already taken.
    #[error("entry has no reader")]
    MissingReader,

    /// An engine operation was invoked before `initialize`.
    #[error("storage engine is not initialized")]
    NotInitialized,

    /// I/O error while reading stored bytes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Returns `true` for the recoverable "no such entry" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if a lazy reader was used in the unopened state.
    pub fn is_not_opened(&self) -> bool {
        matches!(self, Self::NotOpened)
    }
}

impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for StorageError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

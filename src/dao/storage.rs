use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable description of the failure.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// An optimistic commit lost against a concurrent writer.
    #[error("write conflict on `{key}`")]
    Conflict {
        /// Document key whose revision no longer matched.
        key: String,
    },
    /// A stored document could not be decoded into the expected shape.
    #[error("corrupted document `{key}`: {message}")]
    Corrupted {
        /// Offending document key.
        key: String,
        /// What was wrong with it.
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict error for the given document key.
    pub fn conflict(key: impl ToString) -> Self {
        StorageError::Conflict {
            key: key.to_string(),
        }
    }

    /// Construct a corruption error for the given document key.
    pub fn corrupted(key: impl ToString, message: impl Into<String>) -> Self {
        StorageError::Corrupted {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Whether retrying the whole transaction could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

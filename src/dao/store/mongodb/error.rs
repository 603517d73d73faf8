use mongodb::error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure};
use thiserror::Error;

/// Result alias for MongoDB operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY: i32 = 11000;
const WRITE_CONFLICT: i32 = 112;

/// Failures of the MongoDB backend before they are mapped to [`StorageError`](crate::dao::storage::StorageError).
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A required environment variable is not set.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Variable name.
        var: &'static str,
    },
    /// The driver rejected the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered the initial ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Pings sent.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// A periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection name.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A query failed.
    #[error("failed to read `{target}`")]
    Read {
        /// Document or collection read.
        target: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A write failed for a reason other than a conflict.
    #[error("failed to write `{target}`")]
    Write {
        /// Document written.
        target: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A multi-document transaction failed.
    #[error("MongoDB transaction failed during {stage}")]
    Transaction {
        /// Step that failed (`start`, `commit`, ...).
        stage: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A revision guard did not match.
    #[error("write conflict on `{key}`")]
    Conflict {
        /// Contended document key.
        key: String,
    },
    /// A stored document could not be decoded.
    #[error("corrupted document `{key}`: {message}")]
    Corrupted {
        /// Document key.
        key: String,
        /// Decoding failure.
        message: String,
    },
}

impl MongoDaoError {
    /// Classify a failed write, turning lost races into [`MongoDaoError::Conflict`].
    pub fn write(target: impl ToString, source: MongoError) -> Self {
        if is_conflict(&source) {
            MongoDaoError::Conflict {
                key: target.to_string(),
            }
        } else {
            MongoDaoError::Write {
                target: target.to_string(),
                source,
            }
        }
    }

    /// Wrap a failed query.
    pub fn read(target: impl ToString, source: MongoError) -> Self {
        MongoDaoError::Read {
            target: target.to_string(),
            source,
        }
    }

    /// Whether the operation lost against a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        match self {
            MongoDaoError::Conflict { .. } => true,
            MongoDaoError::Transaction { source, .. } => is_conflict(source),
            _ => false,
        }
    }
}

fn is_conflict(err: &MongoError) -> bool {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return true;
    }
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => {
            command.code == WRITE_CONFLICT || command.code == DUPLICATE_KEY
        }
        _ => false,
    }
}

//! MongoDB backend. Multi-document commits rely on MongoDB transactions, so the
//! deployment must be a replica set (a single-node replica set is enough).

mod error;
mod models;
mod store;

use mongodb::options::ClientOptions;

pub use error::MongoDaoError;
pub use store::MongoDebateStore;

use crate::dao::storage::StorageError;
use error::MongoResult;

const DEFAULT_DB: &str = "debate";

/// Connection settings for [`MongoDebateStore`].
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed driver options.
    pub options: ClientOptions,
    /// Database holding every collection of the service.
    pub database_name: String,
}

impl MongoConfig {
    /// Parse a connection string; the database defaults to `debate`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DB).to_owned(),
        })
    }

    /// Read `MONGO_URI` (required) and `MONGO_DB` (optional).
    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let database = std::env::var("MONGO_DB").ok();
        Self::from_uri(&uri, database.as_deref()).await
    }
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        if err.is_conflict() {
            return match err {
                MongoDaoError::Conflict { key } => StorageError::Conflict { key },
                other => StorageError::conflict(other),
            };
        }
        match err {
            MongoDaoError::Corrupted { key, message } => StorageError::Corrupted { key, message },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

//! Storage-level errors and their mapping onto the engine taxonomy.

use plaasjapie_core::Error;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Cannot open database: {0}")]
    Open(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Writer is not running")]
    WriterClosed,
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Query(e) => Error::database(e.to_string()),
            StorageError::Pool(e) => Error::database(format!("Connection pool error: {}", e)),
            StorageError::WriterClosed => Error::database("Database writer is not running"),
            other => Error::storage_unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failures_degrade_to_storage_unavailable() {
        let err: Error = StorageError::Migration("no such table".to_string()).into();
        assert!(matches!(err, Error::StorageUnavailable(_)));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: Error = StorageError::from(io).into();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn query_failures_stay_database_errors() {
        let err: Error = StorageError::from(diesel::result::Error::NotFound).into();
        assert!(matches!(err, Error::Database(_)));
    }
}

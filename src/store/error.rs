use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(#[from] r2d2::Error),

    #[error("database execution error: {0}")]
    Rusqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("address network mismatch: {0}")]
    NetworkMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

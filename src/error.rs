use thiserror::Error;

/// Failure modes of the ledger store and its configuration.
///
/// Deleting a movement that does not exist is a successful no-op
/// (idempotent delete), so there is no NotFound variant.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Rejected input: raised before any row is written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad role/policy configuration, e.g. an unknown policy name.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

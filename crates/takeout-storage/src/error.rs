//! Store error types

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No single principal (with a single aggregate root) matched the claim
    #[error("Invalid username or email")]
    IdentityNotFound,

    #[error("Invalid export manifest: {0}")]
    Manifest(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key reference is ambiguous: {0}")]
    AmbiguousKey(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Passphrase error: {0}")]
    Passphrase(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Operation exceeded {}s deadline", .0.as_secs())]
    Timeout(Duration),

    #[error("Format error: {0}")]
    Proto(#[from] takeout_proto::ProtoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

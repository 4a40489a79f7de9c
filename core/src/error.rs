use thiserror::Error;

/// Errors raised by the core primitives
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("invalid hash encoding: {0}")]
    InvalidHash(String),
    #[error("transaction hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid hex digest: {0}")]
    InvalidHex(String),

    #[error("Invalid digest length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

pub type CryptoResult<T> = Result<T, CryptoError>;

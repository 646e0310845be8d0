use thiserror::Error;

/// Errors from rotation state persistence.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state save conflict persisted after {0} attempts")]
    ConflictExhausted(usize),

    #[error("state store error: {0}")]
    Store(String),
}

/// Result type for rotation operations.
pub type Result<T> = std::result::Result<T, RotationError>;

use thiserror::Error;

/// Errors that can occur while publishing to object storage.
#[derive(Error, Debug)]
pub enum PublisherError {
    /// Invalid backend configuration. Fatal at startup, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend rejected the caller's credentials or the bucket is not
    /// writable. Surfaced by `validate()`; retryable in steady state since
    /// permissions may be patched.
    #[error("permission error: {0}")]
    Permission(String),

    /// Transient backend failure (network, 5xx). Retryable.
    #[error("publish error: {0}")]
    Publish(String),

    #[error("invalid object path: {0}")]
    Path(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] keymirror_commons::ModelError),
}

impl PublisherError {
    /// Whether a reconciliation hitting this error should be requeued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublisherError::Publish(_) | PublisherError::Permission(_))
    }
}

/// Result type for publisher operations.
pub type Result<T> = std::result::Result<T, PublisherError>;

use thiserror::Error;

/// Errors from fetching or caching OIDC metadata.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// API server request failed. Retryable on the next poll tick.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The fetched payload is structurally unusable. Not retryable until
    /// the source changes.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<keymirror_commons::ModelError> for BridgeError {
    fn from(e: keymirror_commons::ModelError) -> Self {
        BridgeError::Validation(e.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

use thiserror::Error;

/// Errors produced when validating or transforming OIDC metadata.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),

    #[error("unsupported key type: {0} (only RSA is supported)")]
    UnsupportedKeyType(String),

    #[error("duplicate key id in JWKS: {0}")]
    DuplicateKeyId(String),

    #[error("JWKS contains no keys")]
    EmptyJwks,

    #[error("invalid issuer URL: {0}")]
    InvalidIssuerUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

//! # keymirror-publisher
//!
//! Mirrors OIDC metadata to public object storage. All four backends
//! (S3, GCS, Azure Blob, OCI Object Storage) are reached through the
//! `object_store` crate behind a single `Arc<dyn ObjectStore>`; the
//! factory is the only backend-specific code.
//!
//! Writes are conditional: every put carries the precondition token
//! observed by a preceding head, so concurrent replicas race safely and
//! the loser's precondition failure counts as success.

pub mod config;
pub mod error;
pub mod factory;
pub mod publisher;

pub use config::{AzureConfig, BackendKind, GcsConfig, OciConfig, PublisherSettings, S3Config};
pub use error::{PublisherError, Result};
pub use publisher::{PutOutcome, StoragePublisher};

//! # keymirror-commons
//!
//! Shared models and constants for KeyMirror: the OIDC discovery document,
//! JWK/JWKS types observed from the Kubernetes API server, and the issuer
//! rewrite applied before publishing.

pub mod constants;
pub mod deadline;
pub mod discovery;
pub mod error;
pub mod jwk;
pub mod validation;

pub use deadline::Deadline;
pub use discovery::DiscoveryDocument;
pub use error::ModelError;
pub use jwk::{Jwk, Jwks};

//! # keymirror-bridge
//!
//! The API-server side of the mirror: authenticated fetches of the OIDC
//! discovery document and JWKS, and the cluster-wide ConfigMap that caches
//! the most recent successful fetch for every replica to observe.

pub mod cache;
pub mod error;
pub mod fetcher;

pub use cache::MetadataCache;
pub use error::{BridgeError, Result};
pub use fetcher::{FetchResult, OidcFetcher};

//! KeyMirror controller library.
//!
//! Bridges a private Kubernetes OIDC issuer to public object storage: the
//! leader polls the API server's OIDC endpoints into a cluster-wide cache
//! record, every replica reconciles that record through the rotation
//! engine and mirrors the result to the configured backend, and in
//! multi-cluster mode the leader aggregates per-cluster JWKS into a
//! shared root key set.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod election;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod poller;

pub use config::KeyMirrorConfig;

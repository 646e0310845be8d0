//! # keymirror-rotation
//!
//! Tracks signing-key changes between successive JWKS fetches. Keys that
//! disappear from the source stay published for a configurable overlap
//! window so in-flight tokens signed with them remain verifiable.
//!
//! The engine is a pure function of its inputs plus the current instant;
//! persistence lives in the state store.

pub mod engine;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use engine::RotationEngine;
pub use error::{Result, RotationError};
pub use manager::RotationManager;
pub use store::{ConfigMapStateStore, StateStore};
pub use types::{EventKind, KeyState, RotationEvent, RotationState};

//! Rotation state and event types. The serialized layout is the persisted
//! contract; field names stay camelCase to match the stored record.

use chrono::{DateTime, Utc};
use keymirror_commons::Jwk;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A key appeared in the source JWKS for the first time.
    NewKey,
    /// A departed key exceeded the overlap window and was removed.
    KeyExpired,
}

impl EventKind {
    /// Label used on metrics and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewKey => "new_key",
            EventKind::KeyExpired => "key_expired",
        }
    }
}

/// A single rotation event produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    pub kind: EventKind,
    pub key_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl RotationEvent {
    pub fn new_key(key_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::NewKey,
            key_id: key_id.to_string(),
            timestamp: now,
            message: format!("New signing key detected: {key_id}"),
        }
    }

    pub fn key_expired(key_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::KeyExpired,
            key_id: key_id.to_string(),
            timestamp: now,
            message: format!("Signing key expired and removed: {key_id}"),
        }
    }
}

/// Observed lifecycle of a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyState {
    pub key_id: String,
    /// Snapshot of the key as last observed; republished during overlap.
    pub key: Jwk,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set when the key first disappears from the source JWKS; cleared if
    /// it reappears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_for_removal: Option<DateTime<Utc>>,
}

/// Complete rotation state: one entry per key the controller has observed
/// and not yet expired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    #[serde(default)]
    pub keys: HashMap<String, KeyState>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,
}

impl RotationState {
    /// Key IDs currently tracked, sorted for stable output.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

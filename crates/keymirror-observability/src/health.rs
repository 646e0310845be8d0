//! Component health tracking for the readiness surface.
//!
//! Each critical component records the outcome of its most recent attempt;
//! readiness fails only while some component's latest attempt failed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Latest recorded outcome for one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// Registry of per-component health.
#[derive(Default)]
pub struct HealthRegistry {
    components: RwLock<BTreeMap<String, ComponentHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt.
    pub fn record_success(&self, component: &str) {
        self.components.write().insert(
            component.to_string(),
            ComponentHealth { healthy: true, message: None, last_update: Utc::now() },
        );
    }

    /// Record a failed attempt with its error message.
    pub fn record_failure(&self, component: &str, message: &str) {
        self.components.write().insert(
            component.to_string(),
            ComponentHealth {
                healthy: false,
                message: Some(message.to_string()),
                last_update: Utc::now(),
            },
        );
    }

    /// Ready unless some component's most recent attempt failed. A
    /// component that has not reported yet does not block readiness.
    pub fn is_ready(&self) -> bool {
        self.components.read().values().all(|c| c.healthy)
    }

    /// Per-component health bits for the metrics gauge.
    pub fn status_map(&self) -> BTreeMap<String, bool> {
        self.components.read().iter().map(|(k, v)| (k.clone(), v.healthy)).collect()
    }

    /// Full snapshot for the health endpoint.
    pub fn snapshot(&self) -> HealthSnapshot {
        let components = self.components.read().clone();
        HealthSnapshot { ready: components.values().all(|c| c.healthy), components }
    }
}

/// Serializable view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub ready: bool,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_ready() {
        assert!(HealthRegistry::new().is_ready());
    }

    #[test]
    fn test_failure_blocks_readiness_until_next_success() {
        let registry = HealthRegistry::new();
        registry.record_success("publisher");
        registry.record_failure("bridge", "connection refused");
        assert!(!registry.is_ready());

        registry.record_success("bridge");
        assert!(registry.is_ready());

        let snap = registry.snapshot();
        assert!(snap.ready);
        assert_eq!(snap.components.len(), 2);
    }

    #[test]
    fn test_status_map_reflects_latest_outcomes() {
        let registry = HealthRegistry::new();
        registry.record_failure("publisher", "403");
        let map = registry.status_map();
        assert_eq!(map.get("publisher"), Some(&false));
    }
}

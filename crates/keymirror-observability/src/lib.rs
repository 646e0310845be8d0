//! # keymirror-observability
//!
//! Process-global observability surfaces: an atomic metrics registry
//! snapshotted as JSON, and a health registry tracking the latest outcome
//! per component. Both are created once at startup and shared.

pub mod health;
pub mod metrics;

pub use health::{ComponentHealth, HealthRegistry, HealthSnapshot};
pub use metrics::{Metrics, MetricsSnapshot};

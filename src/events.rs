//! Kubernetes event emission against the controller's own Pod.
//!
//! The pod identity comes from the Downward-API `POD_NAME`/`POD_NAMESPACE`
//! environment variables; without them events are silently skipped so the
//! controller still runs outside a pod.

use k8s_openapi::api::core::v1::ObjectReference;
use keymirror_commons::constants::CONTROLLER_NAME;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use log::{debug, warn};

/// Publishes `Synced` / `SyncFailed` / `KeyRotation` events.
pub struct EventEmitter {
    recorder: Option<Recorder>,
    pod_ref: Option<ObjectReference>,
}

impl EventEmitter {
    /// `fallback_namespace` applies when `POD_NAMESPACE` is unset.
    pub fn new(client: Client, fallback_namespace: &str) -> Self {
        let pod_name = std::env::var("POD_NAME").unwrap_or_default();
        if pod_name.is_empty() {
            debug!("POD_NAME not set, Kubernetes events disabled");
            return Self { recorder: None, pod_ref: None };
        }
        let pod_namespace = std::env::var("POD_NAMESPACE")
            .unwrap_or_else(|_| fallback_namespace.to_string());

        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: Some(pod_name.clone()),
        };
        let pod_ref = ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            name: Some(pod_name),
            namespace: Some(pod_namespace),
            ..Default::default()
        };

        Self { recorder: Some(Recorder::new(client, reporter)), pod_ref: Some(pod_ref) }
    }

    /// Emit a Normal event.
    pub async fn normal(&self, reason: &str, action: &str, note: String) {
        self.publish(EventType::Normal, reason, action, note).await;
    }

    /// Emit a Warning event.
    pub async fn warning(&self, reason: &str, action: &str, note: String) {
        self.publish(EventType::Warning, reason, action, note).await;
    }

    async fn publish(&self, type_: EventType, reason: &str, action: &str, note: String) {
        let (Some(recorder), Some(pod_ref)) = (&self.recorder, &self.pod_ref) else {
            return;
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(&event, pod_ref).await {
            warn!("failed to publish {reason} event: {e}");
        }
    }
}

//! The publish reconciler. Runs on every replica: watches the OIDC
//! metadata ConfigMap, runs the rotation engine against the persisted
//! state, rewrites the discovery document, and mirrors both artifacts to
//! the storage backend under optimistic preconditions.

use crate::events::EventEmitter;
use chrono::Utc;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use keymirror_bridge::cache::CachedMetadata;
use keymirror_bridge::{BridgeError, MetadataCache};
use keymirror_commons::constants::{EVENT_REASON_KEY_ROTATION, EVENT_REASON_SYNCED, EVENT_REASON_SYNC_FAILED};
use keymirror_commons::Deadline;
use keymirror_observability::{HealthRegistry, Metrics};
use keymirror_publisher::StoragePublisher;
use keymirror_rotation::RotationManager;
use kube::api::Api;
use kube::runtime::watcher;
use kube::Client;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Initial requeue delay for retryable failures.
const REQUEUE_BASE: Duration = Duration::from_secs(1);

/// Requeue delay ceiling.
const REQUEUE_MAX: Duration = Duration::from_secs(300);

/// Deadline budget for one reconciliation attempt; every network call
/// inside it runs against the time remaining.
const RECONCILE_TIMEOUT: Duration = Duration::from_secs(120);

/// How a reconciliation failed.
#[derive(Debug)]
enum ReconcileError {
    /// Requeue and try again.
    Retryable(String),
    /// Dropped until the cache record next changes.
    Fatal(String),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Retryable(msg) => write!(f, "{msg} (will requeue)"),
            ReconcileError::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

/// All collaborators of one reconciliation pass.
pub struct Reconciler {
    pub cache: MetadataCache,
    pub rotation: RotationManager,
    pub publisher: Arc<StoragePublisher>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<HealthRegistry>,
    pub events: Arc<EventEmitter>,
    /// Issuer written into every published discovery document.
    pub public_issuer_url: String,
}

impl Reconciler {
    /// One pass over a decoded cache record, bounded by `deadline`.
    async fn reconcile(
        &self,
        metadata: &CachedMetadata,
        deadline: Deadline,
    ) -> Result<(), ReconcileError> {
        // Rotation: fold the fetched JWKS into the persisted state and get
        // the merged publishable set plus events.
        let (publishable, rotation_events) = self
            .rotation
            .process_jwks(&metadata.jwks, deadline)
            .await
            .map_err(|e| ReconcileError::Retryable(format!("rotation processing failed: {e}")))?;

        for event in &rotation_events {
            self.metrics.record_rotation(event.kind.as_str());
            self.events
                .normal(EVENT_REASON_KEY_ROTATION, "Rotate", event.message.clone())
                .await;
        }

        // Rewrite the discovery document for the public issuer.
        let rewritten = metadata
            .discovery
            .rewrite_for_public(&self.public_issuer_url)
            .map_err(|e| ReconcileError::Fatal(format!("discovery rewrite failed: {e}")))?;

        // Mirror both artifacts. Precondition races surface as success
        // inside the publisher.
        let publish_start = Instant::now();
        match self.publisher.publish(&rewritten, &publishable, deadline).await {
            Ok(()) => {
                self.health.record_success("publisher");
            }
            Err(e) => {
                self.metrics.record_publish_error(self.publisher.backend());
                self.health.record_failure("publisher", &e.to_string());
                let msg = format!("publish failed: {e}");
                return Err(if e.is_retryable() {
                    ReconcileError::Retryable(msg)
                } else {
                    ReconcileError::Fatal(msg)
                });
            }
        }

        let duration = publish_start.elapsed().as_secs_f64();
        self.metrics.record_publish(duration, Utc::now().timestamp() as u64);
        self.metrics.set_active_keys(publishable.keys.len());

        info!(
            "sync completed: {} keys published, {} rotation events, publish took {duration:.3}s",
            publishable.keys.len(),
            rotation_events.len()
        );
        Ok(())
    }
}

/// Watch the cache ConfigMap and drive the reconciler until shutdown.
///
/// Reconciliations are serialized in this loop; bursts of watch events
/// coalesce in the single-slot trigger channel. Retryable failures requeue
/// with exponential backoff, fatal ones drop until the record changes.
pub async fn run(
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: String,
    configmap_name: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let api: Api<ConfigMap> = Api::namespaced(client, &namespace);
    let watch_config =
        watcher::Config::default().fields(&format!("metadata.name={configmap_name}"));

    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);

    // Watch task: translate applied events into reconcile triggers.
    let mut watch_shutdown = shutdown.clone();
    let watch_task = tokio::spawn(async move {
        let mut stream = Box::pin(watcher(api, watch_config));
        loop {
            tokio::select! {
                _ = watch_shutdown.changed() => {
                    if *watch_shutdown.borrow() {
                        return;
                    }
                }
                event = stream.next() => {
                    match event {
                        Some(Ok(watcher::Event::Apply(_)))
                        | Some(Ok(watcher::Event::InitApply(_))) => {
                            // A full slot means a reconcile is already due.
                            let _ = trigger_tx.try_send(());
                        }
                        Some(Ok(watcher::Event::Delete(_))) => {
                            info!("OIDC metadata ConfigMap deleted, ignoring");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("cache record watch error: {e}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        None => {
                            warn!("cache record watch stream ended");
                            return;
                        }
                    }
                }
            }
        }
    });

    info!("publish reconciler started, watching ConfigMap {namespace}/{configmap_name}");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            triggered = trigger_rx.recv() => {
                if triggered.is_none() {
                    break;
                }
                reconcile_with_requeue(&reconciler, &mut shutdown).await;
            }
        }
    }

    watch_task.abort();
    info!("publish reconciler stopped");
}

/// Run one reconciliation, requeueing retryable failures with backoff
/// until it succeeds, fails fatally, or shutdown is signalled.
async fn reconcile_with_requeue(reconciler: &Reconciler, shutdown: &mut watch::Receiver<bool>) {
    let mut delay = REQUEUE_BASE;

    loop {
        debug!("reconciliation triggered by OIDC metadata change");

        // Each attempt gets a fresh budget inherited by every network call
        // it makes.
        let deadline = Deadline::after(RECONCILE_TIMEOUT);

        let record = match reconciler.cache.read(deadline).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                debug!("cache record not found, skipping reconciliation");
                return;
            }
            // A malformed record stays malformed until the poller rewrites
            // it; drop instead of requeueing.
            Err(BridgeError::Validation(msg)) => {
                error!("invalid cache record: {msg}");
                reconciler.metrics.record_sync(false);
                reconciler
                    .events
                    .warning(EVENT_REASON_SYNC_FAILED, "Sync", format!("invalid cache record: {msg}"))
                    .await;
                return;
            }
            Err(e) => {
                warn!("failed to read cache record: {e}");
                if crate::election::wait_or_shutdown(delay, shutdown).await {
                    return;
                }
                delay = (delay * 2).min(REQUEUE_MAX);
                continue;
            }
        };

        match reconciler.reconcile(&record, deadline).await {
            Ok(()) => {
                reconciler.metrics.record_sync(true);
                reconciler
                    .events
                    .normal(EVENT_REASON_SYNCED, "Sync", "OIDC metadata synced successfully".to_string())
                    .await;
                return;
            }
            Err(ReconcileError::Fatal(msg)) => {
                error!("sync failed: {msg}");
                reconciler.metrics.record_sync(false);
                reconciler.events.warning(EVENT_REASON_SYNC_FAILED, "Sync", msg).await;
                return;
            }
            Err(ReconcileError::Retryable(msg)) => {
                warn!("sync failed: {msg}, requeueing in {delay:?}");
                reconciler.metrics.record_sync(false);
                if crate::election::wait_or_shutdown(delay, shutdown).await {
                    return;
                }
                delay = (delay * 2).min(REQUEUE_MAX);
            }
        }
    }
}

//! Controller lifecycle: bootstrapping components, wiring runnables, and
//! coordinating graceful shutdown.

use crate::config::KeyMirrorConfig;
use crate::controller::Reconciler;
use crate::election::LeaderElection;
use crate::events::EventEmitter;
use crate::{aggregator, controller, http, poller};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use keymirror_bridge::{MetadataCache, OidcFetcher};
use keymirror_commons::Deadline;
use keymirror_observability::{HealthRegistry, Metrics};
use keymirror_publisher::StoragePublisher;
use keymirror_rotation::{ConfigMapStateStore, RotationManager};
use kube::Client;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Deadline for the startup bucket validation round-trip.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for each periodic backend reachability probe.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregated application components shared by the runnables and the
/// HTTP server.
pub struct ApplicationComponents {
    pub client: Client,
    pub fetcher: OidcFetcher,
    pub cache: MetadataCache,
    pub publisher: Arc<StoragePublisher>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<HealthRegistry>,
    pub events: Arc<EventEmitter>,
    pub public_issuer_url: String,
}

/// Build the kube client, publisher, and shared registries.
pub async fn bootstrap(config: &KeyMirrorConfig) -> Result<ApplicationComponents> {
    let client = Client::try_default().await.context("failed to create Kubernetes client")?;

    let controller = &config.controller;
    let (cluster_group, cluster_id) = if controller.multi_cluster() {
        (Some(controller.cluster_group.as_str()), Some(controller.cluster_id.as_str()))
    } else {
        (None, None)
    };

    let publisher = Arc::new(
        StoragePublisher::new(&config.publisher, cluster_group, cluster_id)
            .context("failed to create publisher")?,
    );

    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(HealthRegistry::new());

    // Validation failures warn rather than abort so a misconfigured
    // backend can be corrected without recreating the process.
    if let Err(e) = publisher.validate(Deadline::after(VALIDATE_TIMEOUT)).await {
        warn!("publisher validation failed (will retry in steady state): {e}");
        health.record_failure("publisher", &e.to_string());
    } else {
        health.record_success("publisher");
    }

    let fetcher = OidcFetcher::new(client.clone());
    let cache = MetadataCache::new(client.clone(), &controller.namespace, &controller.metadata_configmap);
    let events = Arc::new(EventEmitter::new(client.clone(), &controller.namespace));

    let public_issuer_url = config.public_issuer_url(publisher.public_url());
    info!(
        "publisher ready: backend={} public_issuer={}",
        publisher.backend(),
        public_issuer_url
    );
    if controller.multi_cluster() {
        info!(
            "multi-cluster mode enabled: group={} cluster={} aggregation_interval={}s",
            controller.cluster_group, controller.cluster_id, controller.aggregation_interval_seconds
        );
    }

    Ok(ApplicationComponents {
        client,
        fetcher,
        cache,
        publisher,
        metrics,
        health,
        events,
        public_issuer_url,
    })
}

/// Start the probe server and all runnables; block until a termination
/// signal, then cancel everything and drain.
pub async fn run(config: &KeyMirrorConfig, components: ApplicationComponents) -> Result<()> {
    let controller_cfg = &config.controller;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (leader_tx, leader_rx) = watch::channel(!controller_cfg.leader_election.enabled);

    // Probe/metrics server.
    let metrics_data = web::Data::new(components.metrics.clone());
    let health_data = web::Data::new(components.health.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(metrics_data.clone())
            .app_data(health_data.clone())
            .configure(http::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind probe server to {bind_addr}"))?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    info!("probe server listening on {bind_addr} (/healthz, /readyz, /metrics)");

    let mut tasks = Vec::new();

    // Leader election (or permanent leadership when disabled).
    if controller_cfg.leader_election.enabled {
        let election = LeaderElection::new(
            components.client.clone(),
            &controller_cfg.namespace,
            &controller_cfg.leader_election.id,
            &leader_identity(),
        );
        tasks.push(tokio::spawn(election.run(leader_tx, shutdown_rx.clone())));
    } else {
        warn!("leader election disabled; this replica always acts as leader");
        // Keep the channel's sender alive until shutdown so receivers keep
        // observing `true`.
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let _leader_tx = leader_tx;
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    // Leader poller.
    tasks.push(tokio::spawn(poller::run(
        components.fetcher.clone(),
        components.cache.clone(),
        components.metrics.clone(),
        components.health.clone(),
        controller_cfg.sync_period_seconds,
        leader_rx.clone(),
        shutdown_rx.clone(),
    )));

    // Publish reconciler on every replica.
    let reconciler = Arc::new(Reconciler {
        cache: components.cache.clone(),
        rotation: RotationManager::new(
            Arc::new(ConfigMapStateStore::new(
                components.client.clone(),
                &controller_cfg.namespace,
                &controller_cfg.rotation_configmap,
            )),
            controller_cfg.rotation_overlap_seconds,
        ),
        publisher: components.publisher.clone(),
        metrics: components.metrics.clone(),
        health: components.health.clone(),
        events: components.events.clone(),
        public_issuer_url: components.public_issuer_url.clone(),
    });
    tasks.push(tokio::spawn(controller::run(
        reconciler,
        components.client.clone(),
        controller_cfg.namespace.clone(),
        controller_cfg.metadata_configmap.clone(),
        shutdown_rx.clone(),
    )));

    // Periodic backend reachability probe keeps the publisher component
    // status fresh between reconciliations.
    tasks.push(tokio::spawn(health_probe_loop(
        components.publisher.clone(),
        components.health.clone(),
        shutdown_rx.clone(),
    )));

    // Leader aggregator in multi-cluster mode.
    if controller_cfg.multi_cluster() {
        tasks.push(tokio::spawn(aggregator::run(
            components.publisher.clone(),
            components.metrics.clone(),
            controller_cfg.aggregation_interval_seconds,
            controller_cfg.cluster_ttl_seconds,
            leader_rx.clone(),
            shutdown_rx.clone(),
        )));
    }

    wait_for_signal().await;
    info!("termination signal received, shutting down");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    server_handle.stop(true).await;
    let _ = server_task.await;

    info!("shutdown complete");
    Ok(())
}

/// Probe the storage backend every minute and record the outcome.
async fn health_probe_loop(
    publisher: Arc<StoragePublisher>,
    health: Arc<HealthRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    const PROBE_PERIOD: Duration = Duration::from_secs(60);

    loop {
        if crate::election::wait_or_shutdown(PROBE_PERIOD, &mut shutdown).await {
            return;
        }
        match publisher.health_check(Deadline::after(HEALTH_CHECK_TIMEOUT)).await {
            Ok(()) => health.record_success("publisher"),
            Err(e) => health.record_failure("publisher", &e.to_string()),
        }
    }
}

/// Identity used as the Lease holder: the pod name, or host-pid fallback
/// outside a pod.
fn leader_identity() -> String {
    std::env::var("POD_NAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("keymirror-{}", std::process::id()))
}

/// Block until SIGTERM or ctrl-c.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

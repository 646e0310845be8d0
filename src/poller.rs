//! Leader-only OIDC poller: periodically fetches the discovery document
//! and JWKS from the API server and writes the cluster-wide cache record.
//!
//! Log lines carry the `oidc-poller` component target.

use keymirror_bridge::{MetadataCache, OidcFetcher};
use keymirror_commons::constants::COMPONENT_OIDC_POLLER;
use keymirror_commons::Deadline;
use keymirror_observability::{HealthRegistry, Metrics};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Run the poll loop. Only active while this replica is the leader; a
/// sync fires immediately on gaining leadership, then on every tick.
pub async fn run(
    fetcher: OidcFetcher,
    cache: MetadataCache,
    metrics: Arc<Metrics>,
    health: Arc<HealthRegistry>,
    sync_period_seconds: u64,
    mut leader: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(sync_period_seconds);
    info!(target: COMPONENT_OIDC_POLLER, "OIDC poller started (sync period {sync_period_seconds}s)");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if !*leader.borrow() {
            tokio::select! {
                _ = shutdown.changed() => continue,
                _ = leader.changed() => continue,
            }
        }

        sync_once(&fetcher, &cache, &metrics, &health, period).await;

        // Tick while leader; leadership loss or shutdown interrupts.
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = leader.changed() => break,
                _ = tokio::time::sleep(period) => {
                    if !*leader.borrow() || *shutdown.borrow() {
                        break;
                    }
                    sync_once(&fetcher, &cache, &metrics, &health, period).await;
                }
            }
        }
    }

    info!(target: COMPONENT_OIDC_POLLER, "OIDC poller stopped");
}

/// One fetch-and-cache pass, bounded by the tick period. Failures log and
/// count; the next tick retries.
async fn sync_once(
    fetcher: &OidcFetcher,
    cache: &MetadataCache,
    metrics: &Metrics,
    health: &HealthRegistry,
    period: Duration,
) {
    debug!(target: COMPONENT_OIDC_POLLER, "polling API server for OIDC metadata");

    // One sync must finish within its own tick.
    let deadline = Deadline::after(period);

    let result = match fetcher.fetch(deadline).await {
        Ok(result) => {
            health.record_success("bridge");
            result
        }
        Err(e) => {
            warn!(target: COMPONENT_OIDC_POLLER, "failed to fetch OIDC metadata: {e}");
            metrics.record_fetch_error();
            health.record_failure("bridge", &e.to_string());
            return;
        }
    };

    if let Err(e) = cache.write(&result.discovery, &result.jwks, deadline).await {
        warn!(target: COMPONENT_OIDC_POLLER, "failed to write OIDC metadata cache record: {e}");
        metrics.record_fetch_error();
        return;
    }

    debug!(
        target: COMPONENT_OIDC_POLLER,
        "cached OIDC metadata: issuer={} keys={}",
        result.discovery.issuer,
        result.jwks.keys.len()
    );
}

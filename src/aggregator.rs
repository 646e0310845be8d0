//! Leader-only multi-cluster aggregator: merges per-cluster JWKS objects
//! into the root JWKS, pruning clusters whose objects have gone stale.
//!
//! Log lines carry the `aggregation-poller` component target.

use chrono::Utc;
use keymirror_commons::constants::COMPONENT_AGGREGATION_POLLER;
use keymirror_commons::{Deadline, Jwk, Jwks};
use keymirror_observability::Metrics;
use keymirror_publisher::StoragePublisher;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Run the aggregation loop. Ticks only while this replica is the leader;
/// the first aggregation fires immediately on gaining leadership.
pub async fn run(
    publisher: Arc<StoragePublisher>,
    metrics: Arc<Metrics>,
    aggregation_interval_seconds: u64,
    cluster_ttl_seconds: u64,
    mut leader: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(aggregation_interval_seconds);
    info!(
        target: COMPONENT_AGGREGATION_POLLER,
        "aggregation poller started (interval {aggregation_interval_seconds}s, cluster TTL {cluster_ttl_seconds}s)"
    );

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

        aggregate_once(&publisher, &metrics, cluster_ttl_seconds, period).await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = leader.changed() => break,
                _ = tokio::time::sleep(period) => {
                    if !*leader.borrow() || *shutdown.borrow() {
                        break;
                    }
                    aggregate_once(&publisher, &metrics, cluster_ttl_seconds, period).await;
                }
            }
        }
    }

    info!(target: COMPONENT_AGGREGATION_POLLER, "aggregation poller stopped");
}

/// One aggregation tick: list live cluster JWKS, merge, publish. The
/// whole tick is bounded by its own period.
async fn aggregate_once(
    publisher: &StoragePublisher,
    metrics: &Metrics,
    cluster_ttl_seconds: u64,
    period: Duration,
) {
    let deadline = Deadline::after(period);

    let live = match publisher.list_cluster_jwks(cluster_ttl_seconds, Utc::now(), deadline).await {
        Ok(live) => live,
        Err(e) => {
            warn!(target: COMPONENT_AGGREGATION_POLLER, "failed to list cluster JWKS: {e}");
            metrics.record_publish_error(publisher.backend());
            return;
        }
    };

    let merged = merge_cluster_jwks(&live);
    if merged.keys.is_empty() {
        debug!(target: COMPONENT_AGGREGATION_POLLER, "no active cluster JWKS to aggregate");
        return;
    }

    match publisher.publish_aggregated(&merged, deadline).await {
        Ok(_) => {
            info!(
                target: COMPONENT_AGGREGATION_POLLER,
                "aggregated JWKS published: {} clusters, {} keys",
                live.len(),
                merged.keys.len()
            );
        }
        Err(e) => {
            warn!(target: COMPONENT_AGGREGATION_POLLER, "failed to publish aggregated JWKS: {e}");
            metrics.record_publish_error(publisher.backend());
        }
    }
}

/// Union of all cluster keys, deduplicated by key ID. Clusters are visited
/// in ID order and keys in their published order, so the first occurrence
/// wins and the result is stable within one tick.
pub fn merge_cluster_jwks(clusters: &BTreeMap<String, Jwks>) -> Jwks {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged: Vec<Jwk> = Vec::new();

    for jwks in clusters.values() {
        for key in &jwks.keys {
            if seen.insert(key.kid.as_str()) {
                merged.push(key.clone());
            }
        }
    }

    Jwks { keys: merged }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: kid.to_string(),
            alg: None,
            use_: None,
            n: Some(format!("n-{kid}")),
            e: Some("AQAB".to_string()),
        }
    }

    #[test]
    fn test_merge_dedupes_by_kid_first_occurrence_wins() {
        // S6: clusters a={Ka}, b={Kb}, c={Kc, Ka} merge to {Ka, Kb, Kc}.
        let clusters = BTreeMap::from([
            ("a".to_string(), Jwks { keys: vec![key("Ka")] }),
            ("b".to_string(), Jwks { keys: vec![key("Kb")] }),
            ("c".to_string(), Jwks { keys: vec![key("Kc"), key("Ka")] }),
        ]);

        let merged = merge_cluster_jwks(&clusters);
        assert_eq!(merged.keys.len(), 3);
        let kids: Vec<&str> = merged.keys.iter().map(|k| k.kid.as_str()).collect();
        assert_eq!(kids, vec!["Ka", "Kb", "Kc"]);
        // First occurrence of Ka (cluster a's copy) wins.
        assert_eq!(merged.keys[0].n.as_deref(), Some("n-Ka"));
    }

    #[test]
    fn test_merge_is_stable_across_calls() {
        let clusters = BTreeMap::from([
            ("beta".to_string(), Jwks { keys: vec![key("k2"), key("k3")] }),
            ("alpha".to_string(), Jwks { keys: vec![key("k1")] }),
        ]);
        let first = merge_cluster_jwks(&clusters);
        let second = merge_cluster_jwks(&clusters);
        assert_eq!(first, second);
        // BTreeMap ordering: alpha's keys precede beta's.
        assert_eq!(first.keys[0].kid, "k1");
    }

    #[test]
    fn test_merge_empty_input_is_empty() {
        assert!(merge_cluster_jwks(&BTreeMap::new()).keys.is_empty());
    }
}

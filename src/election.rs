//! Lease-based leader election.
//!
//! One `coordination.k8s.io/v1` Lease is the lock; the holder identity is
//! this replica's pod name. Atomicity comes from the API server's
//! resourceVersion conflict semantics on replace. Leader-only runnables
//! observe the exported watch channel and must stop when it flips to
//! false.

use anyhow::Result;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Lease duration claimed in the lock.
const LEASE_DURATION_SECONDS: i32 = 15;

/// How often the leader renews.
const RENEW_PERIOD: Duration = Duration::from_secs(10);

/// How often a non-leader retries acquisition.
const RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Deadline for each Lease API request. Must stay well below the lease
/// duration so a slow request cannot silently outlive the lock.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A single replica's participation in the election.
pub struct LeaderElection {
    api: Api<Lease>,
    lock_name: String,
    identity: String,
}

impl LeaderElection {
    pub fn new(client: Client, namespace: &str, lock_name: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lock_name: lock_name.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Run the acquire/renew loop until shutdown. Leadership state is
    /// published on `leader_tx`; the lease is released on the way out.
    pub async fn run(self, leader_tx: watch::Sender<bool>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "starting leader election: lock={} identity={}",
            self.lock_name, self.identity
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.try_acquire().await {
                Ok(true) => {
                    info!("acquired leadership: lock={}", self.lock_name);
                    let _ = leader_tx.send(true);
                    self.renew_until_lost(&mut shutdown).await;
                    let _ = leader_tx.send(false);
                    if *shutdown.borrow() {
                        break;
                    }
                    info!("lost leadership: lock={}", self.lock_name);
                }
                Ok(false) => {
                    debug!("leadership held elsewhere, retrying in {RETRY_PERIOD:?}");
                    if wait_or_shutdown(RETRY_PERIOD, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("leader election attempt failed: {e}");
                    if wait_or_shutdown(RETRY_PERIOD, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.release().await;
        let _ = leader_tx.send(false);
        info!("leader election stopped: lock={}", self.lock_name);
    }

    /// Attempt to take or keep the lock. Returns whether this replica is
    /// now the holder.
    async fn try_acquire(&self) -> Result<bool> {
        let now = MicroTime(Utc::now());

        match bounded("get lease", self.api.get_opt(&self.lock_name)).await?? {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.lock_name.clone()),
                        ..Default::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.identity.clone()),
                        lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
                        acquire_time: Some(now.clone()),
                        renew_time: Some(now),
                        lease_transitions: Some(0),
                        ..Default::default()
                    }),
                };
                match bounded("create lease", self.api.create(&PostParams::default(), &lease))
                    .await?
                {
                    Ok(_) => Ok(true),
                    // Another replica created it between our get and create.
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            Some(mut lease) => {
                let spec = lease.spec.clone().unwrap_or_default();
                let holder = spec.holder_identity.clone().unwrap_or_default();

                if holder == self.identity {
                    return self.replace_spec(&mut lease, |s| {
                        s.renew_time = Some(MicroTime(Utc::now()));
                    })
                    .await;
                }

                if !holder.is_empty() && !lease_expired(&spec) {
                    return Ok(false);
                }

                // Expired or released; take over.
                let identity = self.identity.clone();
                self.replace_spec(&mut lease, move |s| {
                    let now = MicroTime(Utc::now());
                    s.holder_identity = Some(identity.clone());
                    s.lease_duration_seconds = Some(LEASE_DURATION_SECONDS);
                    s.acquire_time = Some(now.clone());
                    s.renew_time = Some(now);
                    s.lease_transitions = Some(s.lease_transitions.unwrap_or(0) + 1);
                })
                .await
            }
        }
    }

    /// Renew while we hold the lock; returns when leadership is lost or
    /// shutdown is signalled.
    async fn renew_until_lost(&self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if wait_or_shutdown(RENEW_PERIOD, shutdown).await {
                return;
            }
            match self.renew().await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!("lease renewal failed: {e}");
                    return;
                }
            }
        }
    }

    /// Renew the lease if we still hold it.
    async fn renew(&self) -> Result<bool> {
        let Some(mut lease) = bounded("get lease", self.api.get_opt(&self.lock_name)).await?? else {
            return Ok(false);
        };
        let holder = lease
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.clone())
            .unwrap_or_default();
        if holder != self.identity {
            return Ok(false);
        }
        self.replace_spec(&mut lease, |s| {
            s.renew_time = Some(MicroTime(Utc::now()));
        })
        .await
    }

    /// Release the lock on shutdown so a peer can take over immediately.
    /// Best-effort.
    async fn release(&self) {
        let Ok(Ok(Some(mut lease))) = bounded("get lease", self.api.get_opt(&self.lock_name)).await
        else {
            return;
        };
        let holder = lease
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.clone())
            .unwrap_or_default();
        if holder != self.identity {
            return;
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
        }
        lease.metadata.managed_fields = None;
        match bounded(
            "release lease",
            self.api.replace(&self.lock_name, &PostParams::default(), &lease),
        )
        .await
        {
            Ok(Ok(_)) => info!("released leadership lease {}", self.lock_name),
            Ok(Err(e)) => debug!("lease release failed (ignored): {e}"),
            Err(e) => debug!("lease release timed out (ignored): {e}"),
        }
    }

    /// Replace the lease with a mutated spec; a resourceVersion conflict
    /// means another replica moved first.
    async fn replace_spec(
        &self,
        lease: &mut Lease,
        mutate: impl FnOnce(&mut LeaseSpec),
    ) -> Result<bool> {
        let spec = lease.spec.get_or_insert_with(Default::default);
        mutate(spec);
        lease.metadata.managed_fields = None;
        match bounded(
            "replace lease",
            self.api.replace(&self.lock_name, &PostParams::default(), lease),
        )
        .await?
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Run a Lease request with a bounded deadline; the inner result is
/// handed back for status-specific handling.
async fn bounded<T, F>(what: &str, fut: F) -> Result<std::result::Result<T, kube::Error>>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    tokio::time::timeout(REQUEST_TIMEOUT, fut)
        .await
        .map_err(|_| anyhow::anyhow!("{what}: deadline exceeded"))
}

/// Whether the lease's last renewal is older than its claimed duration.
fn lease_expired(spec: &LeaseSpec) -> bool {
    let duration = i64::from(spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECONDS));
    match &spec.renew_time {
        Some(renew) => Utc::now().signed_duration_since(renew.0) > chrono::Duration::seconds(duration),
        None => true,
    }
}

/// Sleep for `period` but wake early on shutdown. Returns true when
/// shutdown was signalled.
pub async fn wait_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => *shutdown.borrow(),
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

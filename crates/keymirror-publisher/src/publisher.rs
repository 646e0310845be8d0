//! The storage publisher: conditional writes of OIDC metadata plus the
//! multi-cluster aggregation operations used by the leader.

use crate::config::PublisherSettings;
use crate::error::{PublisherError, Result};
use crate::factory::build_object_store;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use keymirror_commons::constants::{CLUSTERS_OBJECT_DIR, DISCOVERY_OBJECT_KEY, JWKS_OBJECT_KEY};
use keymirror_commons::{Deadline, DiscoveryDocument, Jwks};
use log::{debug, info, warn};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, UpdateVersion,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// This writer's bytes are now the object.
    Written,
    /// Another replica updated the object between our head and put. Its
    /// bytes won; for identical inputs this is equivalent to `Written`.
    RacedByPeer,
}

/// Publishes OIDC metadata to one object-storage backend.
///
/// All keys are relative to the effective storage prefix (applied by the
/// factory); the same instance serves single- and multi-cluster layouts.
/// Every operation takes the enclosing work item's [`Deadline`] and never
/// outlives it.
pub struct StoragePublisher {
    store: Arc<dyn ObjectStore>,
    backend: String,
    public_url: String,
    content_type: String,
    cache_control: String,
    /// Set in multi-cluster mode; JWKS writes then land on the cluster
    /// sub-path and the root JWKS belongs to the aggregator.
    cluster_id: Option<String>,
}

impl StoragePublisher {
    /// Build a publisher from settings. `cluster_group`/`cluster_id` are
    /// both set in multi-cluster mode; the group becomes the storage prefix.
    pub fn new(
        settings: &PublisherSettings,
        cluster_group: Option<&str>,
        cluster_id: Option<&str>,
    ) -> Result<Self> {
        let prefix = match cluster_group {
            Some(group) => group.to_string(),
            None => settings.prefix().trim_matches('/').to_string(),
        };
        let store = build_object_store(settings, &prefix)?;

        Ok(Self {
            store,
            backend: settings.backend.to_string(),
            public_url: settings.public_url(&prefix)?,
            content_type: settings.content_type(),
            cache_control: settings.cache_control(),
            cluster_id: cluster_id.map(str::to_string),
        })
    }

    /// Assemble a publisher from pre-built parts. Used by tests with an
    /// in-memory store.
    pub fn from_parts(
        store: Arc<dyn ObjectStore>,
        backend: &str,
        public_url: &str,
        cluster_id: Option<&str>,
    ) -> Self {
        Self {
            store,
            backend: backend.to_string(),
            public_url: public_url.to_string(),
            content_type: crate::config::DEFAULT_CONTENT_TYPE.to_string(),
            cache_control: crate::config::DEFAULT_CACHE_CONTROL.to_string(),
            cluster_id: cluster_id.map(str::to_string),
        }
    }

    /// The backend name ("s3", "gcs", "azure", "oci").
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Public HTTPS URL of the issuer root.
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Object key the JWKS is published under for this instance.
    pub fn jwks_key(&self) -> String {
        match &self.cluster_id {
            Some(id) => format!("{CLUSTERS_OBJECT_DIR}/{id}/{JWKS_OBJECT_KEY}"),
            None => JWKS_OBJECT_KEY.to_string(),
        }
    }

    /// Upload the rewritten discovery document and the publishable JWKS.
    pub async fn publish(
        &self,
        discovery: &DiscoveryDocument,
        jwks: &Jwks,
        deadline: Deadline,
    ) -> Result<()> {
        let discovery_json = discovery.to_json()?;
        self.put_object(DISCOVERY_OBJECT_KEY, Bytes::from(discovery_json), deadline).await?;

        let jwks_json = jwks.to_json()?;
        let jwks_key = self.jwks_key();
        self.put_object(&jwks_key, Bytes::from(jwks_json), deadline).await?;

        info!(
            "published OIDC metadata to {}: discovery={DISCOVERY_OBJECT_KEY} jwks={jwks_key}",
            self.backend
        );
        Ok(())
    }

    /// Conditional put: head the object first, then write with the observed
    /// ETag/generation as precondition (or require-absent when no object
    /// exists). A precondition failure means another replica won the race
    /// and is not an error.
    pub async fn put_object(&self, key: &str, data: Bytes, deadline: Deadline) -> Result<PutOutcome> {
        let path = parse_key(key)?;

        let mode = match bounded(deadline, "head", key, self.store.head(&path)).await? {
            Ok(meta) => PutMode::Update(UpdateVersion {
                e_tag: meta.e_tag.clone(),
                version: meta.version.clone(),
            }),
            Err(object_store::Error::NotFound { .. }) => PutMode::Create,
            Err(e) => {
                return Err(PublisherError::Publish(format!("head {key}: {e}")));
            }
        };

        self.put_with_mode(key, data, mode, deadline).await
    }

    async fn put_with_mode(
        &self,
        key: &str,
        data: Bytes,
        mode: PutMode,
        deadline: Deadline,
    ) -> Result<PutOutcome> {
        let path = parse_key(key)?;
        let opts = PutOptions { mode, attributes: self.attributes(), ..Default::default() };

        match bounded(deadline, "put", key, self.store.put_opts(&path, data.into(), opts)).await? {
            Ok(_) => {
                debug!("uploaded object {key} to {}", self.backend);
                Ok(PutOutcome::Written)
            }
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::AlreadyExists { .. }) => {
                debug!("object {key} was updated by another replica, skipping");
                Ok(PutOutcome::RacedByPeer)
            }
            Err(e) => Err(PublisherError::Publish(format!("put {key}: {e}"))),
        }
    }

    /// Current precondition token of an object, or `None` when absent.
    pub async fn head_etag(&self, key: &str, deadline: Deadline) -> Result<Option<String>> {
        let path = parse_key(key)?;
        match bounded(deadline, "head", key, self.store.head(&path)).await? {
            Ok(meta) => Ok(meta.e_tag.or(meta.version)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(PublisherError::Publish(format!("head {key}: {e}"))),
        }
    }

    /// Object bytes, or `None` when absent.
    pub async fn get_object(&self, key: &str, deadline: Deadline) -> Result<Option<Bytes>> {
        let path = parse_key(key)?;
        let fetch = async {
            let result = self.store.get(&path).await?;
            result.bytes().await
        };
        match bounded(deadline, "get", key, fetch).await? {
            Ok(bytes) => Ok(Some(bytes)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(PublisherError::Publish(format!("get {key}: {e}"))),
        }
    }

    /// Server-side last-modified time of an object, or `None` when absent.
    pub async fn head_last_modified(
        &self,
        key: &str,
        deadline: Deadline,
    ) -> Result<Option<DateTime<Utc>>> {
        let path = parse_key(key)?;
        match bounded(deadline, "head", key, self.store.head(&path)).await? {
            Ok(meta) => Ok(Some(meta.last_modified)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(PublisherError::Publish(format!("head {key}: {e}"))),
        }
    }

    /// Cluster IDs present under `clusters/`, via delimiter listing of the
    /// immediate children.
    pub async fn list_cluster_ids(&self, deadline: Deadline) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(CLUSTERS_OBJECT_DIR);
        let listing =
            bounded(deadline, "list", CLUSTERS_OBJECT_DIR, self.store.list_with_delimiter(Some(&prefix)))
                .await?
                .map_err(|e| PublisherError::Publish(format!("list {CLUSTERS_OBJECT_DIR}/: {e}")))?;

        let mut ids: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.parts().last().map(|part| part.as_ref().to_string()))
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Per-cluster JWKS objects that are fresher than `cluster_ttl`
    /// (seconds), keyed by cluster ID. A stale, missing, or unparsable
    /// cluster is skipped, never an error.
    pub async fn list_cluster_jwks(
        &self,
        cluster_ttl_seconds: u64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<BTreeMap<String, Jwks>> {
        let mut live = BTreeMap::new();

        for cluster_id in self.list_cluster_ids(deadline).await? {
            let key = format!("{CLUSTERS_OBJECT_DIR}/{cluster_id}/{JWKS_OBJECT_KEY}");

            let last_modified = match self.head_last_modified(&key, deadline).await? {
                Some(t) => t,
                None => {
                    debug!("cluster {cluster_id} has no JWKS object, skipping");
                    continue;
                }
            };
            let age = now.signed_duration_since(last_modified);
            if age.num_seconds() > cluster_ttl_seconds as i64 {
                info!(
                    "pruning stale cluster {cluster_id} from aggregation (last modified {last_modified})"
                );
                continue;
            }

            let bytes = match self.get_object(&key, deadline).await? {
                Some(b) => b,
                None => {
                    debug!("cluster {cluster_id} JWKS disappeared between head and get, skipping");
                    continue;
                }
            };
            match Jwks::from_json(&bytes) {
                Ok(jwks) => {
                    live.insert(cluster_id, jwks);
                }
                Err(e) => {
                    warn!("failed to parse JWKS for cluster {cluster_id}, skipping: {e}");
                }
            }
        }

        Ok(live)
    }

    /// Write the aggregated JWKS to the root JWKS path with the usual
    /// optimistic precondition.
    pub async fn publish_aggregated(&self, merged: &Jwks, deadline: Deadline) -> Result<PutOutcome> {
        let json = merged.to_json()?;
        self.put_object(JWKS_OBJECT_KEY, Bytes::from(json), deadline).await
    }

    /// Startup validation: the bucket must be reachable and a probe
    /// write/read/delete round-trip must succeed. The probe object lives
    /// inside the configured prefix; cleanup is best-effort.
    pub async fn validate(&self, deadline: Deadline) -> Result<()> {
        bounded(deadline, "list", "", self.store.list_with_delimiter(None))
            .await?
            .map_err(|e| PublisherError::Config(format!("bucket is not accessible: {e}")))?;

        let probe_key = format!(
            ".keymirror/validate-{}-{:08x}.tmp",
            Utc::now().timestamp_millis(),
            rand::random::<u32>()
        );
        let probe_path = parse_key(&probe_key)?;
        let probe_body = Bytes::from_static(b"keymirror-validation\n");

        bounded(deadline, "put", &probe_key, self.store.put(&probe_path, probe_body.clone().into()))
            .await?
            .map_err(|e| PublisherError::Permission(format!("probe write failed: {e}")))?;

        let fetch = async {
            let result = self.store.get(&probe_path).await?;
            result.bytes().await
        };
        let read_back = bounded(deadline, "get", &probe_key, fetch)
            .await?
            .map_err(|e| PublisherError::Permission(format!("probe read failed: {e}")))?;
        if read_back != probe_body {
            return Err(PublisherError::Permission("probe content mismatch".to_string()));
        }

        match bounded(deadline, "delete", &probe_key, self.store.delete(&probe_path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("probe cleanup failed (ignored): {e}"),
            Err(e) => debug!("probe cleanup timed out (ignored): {e}"),
        }

        info!("storage validation succeeded for {} ({})", self.backend, self.public_url);
        Ok(())
    }

    /// Lightweight reachability check used by the readiness surface.
    pub async fn health_check(&self, deadline: Deadline) -> Result<()> {
        bounded(deadline, "list", "", self.store.list_with_delimiter(None))
            .await?
            .map(|_| ())
            .map_err(|e| PublisherError::Publish(format!("health check failed: {e}")))
    }

    fn attributes(&self) -> Attributes {
        Attributes::from_iter([
            (Attribute::ContentType, AttributeValue::from(self.content_type.clone())),
            (Attribute::CacheControl, AttributeValue::from(self.cache_control.clone())),
        ])
    }
}

/// Run a store operation against the time remaining on the deadline. An
/// elapsed deadline is a retryable publish error; the inner result is
/// handed back for variant-specific handling.
async fn bounded<T, F>(
    deadline: Deadline,
    op: &str,
    key: &str,
    fut: F,
) -> Result<std::result::Result<T, object_store::Error>>
where
    F: Future<Output = std::result::Result<T, object_store::Error>>,
{
    tokio::time::timeout(deadline.remaining(), fut)
        .await
        .map_err(|_| PublisherError::Publish(format!("{op} {key}: deadline exceeded")))
}

fn parse_key(key: &str) -> Result<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| PublisherError::Path(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymirror_commons::Jwk;
    use object_store::memory::InMemory;
    use std::time::Duration;

    fn memory_publisher(cluster_id: Option<&str>) -> StoragePublisher {
        StoragePublisher::from_parts(
            Arc::new(InMemory::new()),
            "s3",
            "https://my-bucket.s3.us-east-1.amazonaws.com",
            cluster_id,
        )
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    fn jwks_with(kids: &[&str]) -> Jwks {
        Jwks {
            keys: kids
                .iter()
                .map(|kid| Jwk {
                    kty: "RSA".to_string(),
                    kid: kid.to_string(),
                    alg: Some("RS256".to_string()),
                    use_: Some("sig".to_string()),
                    n: Some("modulus".to_string()),
                    e: Some("AQAB".to_string()),
                })
                .collect(),
        }
    }

    #[test]
    fn test_jwks_key_layout() {
        assert_eq!(memory_publisher(None).jwks_key(), "openid/v1/jwks");
        assert_eq!(
            memory_publisher(Some("cluster-a")).jwks_key(),
            "clusters/cluster-a/openid/v1/jwks"
        );
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let publisher = memory_publisher(None);
        let body = Bytes::from_static(b"{\"keys\":[]}");

        let outcome = publisher.put_object("openid/v1/jwks", body.clone(), deadline()).await.unwrap();
        assert_eq!(outcome, PutOutcome::Written);

        let read = publisher.get_object("openid/v1/jwks", deadline()).await.unwrap().unwrap();
        assert_eq!(read, body);
    }

    #[tokio::test]
    async fn test_get_absent_returns_none() {
        let publisher = memory_publisher(None);
        assert!(publisher.get_object("missing", deadline()).await.unwrap().is_none());
        assert!(publisher.head_etag("missing", deadline()).await.unwrap().is_none());
        assert!(publisher.head_last_modified("missing", deadline()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_deadline_is_retryable_error() {
        let publisher = memory_publisher(None);
        let expired = Deadline::after(Duration::ZERO);

        let err = publisher
            .put_object("k", Bytes::from_static(b"v"), expired)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn test_put_updates_existing_object() {
        let publisher = memory_publisher(None);
        publisher.put_object("k", Bytes::from_static(b"v1"), deadline()).await.unwrap();
        let etag_v1 = publisher.head_etag("k", deadline()).await.unwrap();

        publisher.put_object("k", Bytes::from_static(b"v2"), deadline()).await.unwrap();
        let etag_v2 = publisher.head_etag("k", deadline()).await.unwrap();

        assert_ne!(etag_v1, etag_v2);
        assert_eq!(
            publisher.get_object("k", deadline()).await.unwrap().unwrap(),
            Bytes::from_static(b"v2")
        );
    }

    #[tokio::test]
    async fn test_racing_create_is_success_for_loser() {
        // Two publishers sharing one store simulate two replicas racing on
        // an object that does not exist yet: both head (absent), then both
        // put with a create precondition.
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let a = StoragePublisher::from_parts(store.clone(), "s3", "https://u", None);
        let b = StoragePublisher::from_parts(store, "s3", "https://u", None);
        let body = Bytes::from_static(b"{\"keys\":[]}");

        // Replica A wins the create.
        assert_eq!(
            a.put_object("k", body.clone(), deadline()).await.unwrap(),
            PutOutcome::Written
        );

        // Replica B still believes the object is absent; its create is
        // reported as a raced success, not an error.
        let raced = b.put_with_mode("k", body.clone(), PutMode::Create, deadline()).await.unwrap();
        assert_eq!(raced, PutOutcome::RacedByPeer);

        assert_eq!(b.get_object("k", deadline()).await.unwrap().unwrap(), body);
    }

    #[tokio::test]
    async fn test_stale_precondition_is_raced_outcome() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let publisher = StoragePublisher::from_parts(store.clone(), "s3", "https://u", None);

        publisher.put_object("k", Bytes::from_static(b"v1"), deadline()).await.unwrap();
        let stale = store.head(&ObjectPath::parse("k").unwrap()).await.unwrap();

        // A peer updates the object after our head.
        publisher.put_object("k", Bytes::from_static(b"v2"), deadline()).await.unwrap();

        // Writing with the stale token surfaces as a raced success and the
        // winner's bytes remain.
        let mode = PutMode::Update(UpdateVersion { e_tag: stale.e_tag, version: stale.version });
        let outcome = publisher
            .put_with_mode("k", Bytes::from_static(b"v3"), mode, deadline())
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::RacedByPeer);
        assert_eq!(
            publisher.get_object("k", deadline()).await.unwrap().unwrap(),
            Bytes::from_static(b"v2")
        );
    }

    #[tokio::test]
    async fn test_publish_writes_both_artifacts() {
        let publisher = memory_publisher(Some("cluster-a"));
        let discovery = DiscoveryDocument {
            issuer: "https://u".to_string(),
            jwks_uri: "https://u/openid/v1/jwks".to_string(),
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            response_types_supported: vec!["id_token".to_string()],
            grant_types_supported: Vec::new(),
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_algs: vec!["RS256".to_string()],
            claims_supported: Vec::new(),
            scopes_supported: Vec::new(),
        };
        let jwks = jwks_with(&["k1"]);

        publisher.publish(&discovery, &jwks, deadline()).await.unwrap();

        let discovery_bytes = publisher
            .get_object(".well-known/openid-configuration", deadline())
            .await
            .unwrap()
            .unwrap();
        let published = DiscoveryDocument::from_json(&discovery_bytes).unwrap();
        assert_eq!(published.issuer, "https://u");

        let jwks_bytes = publisher
            .get_object("clusters/cluster-a/openid/v1/jwks", deadline())
            .await
            .unwrap()
            .unwrap();
        let published_jwks = Jwks::from_json(&jwks_bytes).unwrap();
        assert_eq!(published_jwks, jwks);
    }

    #[tokio::test]
    async fn test_list_cluster_ids() {
        let publisher = memory_publisher(None);
        for cluster in ["alpha", "beta"] {
            publisher
                .put_object(
                    &format!("clusters/{cluster}/openid/v1/jwks"),
                    Bytes::from(jwks_with(&["k"]).to_json().unwrap()),
                    deadline(),
                )
                .await
                .unwrap();
        }

        let ids = publisher.list_cluster_ids(deadline()).await.unwrap();
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_list_cluster_jwks_skips_unparsable() {
        let publisher = memory_publisher(None);
        publisher
            .put_object(
                "clusters/good/openid/v1/jwks",
                Bytes::from(jwks_with(&["k1"]).to_json().unwrap()),
                deadline(),
            )
            .await
            .unwrap();
        publisher
            .put_object("clusters/bad/openid/v1/jwks", Bytes::from_static(b"not json"), deadline())
            .await
            .unwrap();

        let live = publisher.list_cluster_jwks(3600, Utc::now(), deadline()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert!(live.contains_key("good"));
    }

    #[tokio::test]
    async fn test_list_cluster_jwks_prunes_by_ttl() {
        let publisher = memory_publisher(None);
        publisher
            .put_object(
                "clusters/stale/openid/v1/jwks",
                Bytes::from(jwks_with(&["k1"]).to_json().unwrap()),
                deadline(),
            )
            .await
            .unwrap();

        // With a zero TTL, every cluster written before "now" is stale.
        let far_future = Utc::now() + chrono::Duration::hours(1);
        let live = publisher.list_cluster_jwks(0, far_future, deadline()).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn test_validate_round_trip_on_memory_store() {
        let publisher = memory_publisher(None);
        publisher.validate(deadline()).await.unwrap();
        publisher.health_check(deadline()).await.unwrap();
    }
}

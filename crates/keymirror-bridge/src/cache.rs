//! The cluster-wide metadata cache: a ConfigMap carrying the most recent
//! successfully fetched discovery document and JWKS. The leader poller is
//! the only writer; every replica watches it to drive reconciliation.

use crate::error::{BridgeError, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keymirror_commons::constants::{
    CONTROLLER_NAME, DISCOVERY_DATA_KEY, JWKS_DATA_KEY, LABEL_COMPONENT, LABEL_NAME,
};
use keymirror_commons::{Deadline, DiscoveryDocument, Jwks};
use kube::api::{Api, PostParams};
use kube::Client;
use log::{debug, info};
use std::collections::BTreeMap;
use std::future::Future;

/// Bounded attempts for the create-or-update conflict loop.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Reads and writes the OIDC metadata ConfigMap.
#[derive(Clone)]
pub struct MetadataCache {
    api: Api<ConfigMap>,
    name: String,
}

/// The two payloads decoded from a cache record.
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    pub discovery: DiscoveryDocument,
    pub jwks: Jwks,
}

impl MetadataCache {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self { api: Api::namespaced(client, namespace), name: name.to_string() }
    }

    /// Name of the backing ConfigMap.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write both payloads, creating the record on first use. Conflicts
    /// with a concurrent writer retry the load-modify-save loop; every
    /// request runs against the caller's deadline.
    pub async fn write(
        &self,
        discovery: &DiscoveryDocument,
        jwks: &Jwks,
        deadline: Deadline,
    ) -> Result<()> {
        let discovery_json = discovery.to_json()?;
        let jwks_json = jwks.to_json()?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match bounded(deadline, "get cache record", self.api.get(&self.name)).await? {
                Ok(mut cm) => {
                    let data = cm.data.get_or_insert_with(BTreeMap::new);
                    data.insert(DISCOVERY_DATA_KEY.to_string(), discovery_json.clone());
                    data.insert(JWKS_DATA_KEY.to_string(), jwks_json.clone());
                    cm.metadata.managed_fields = None;
                    match bounded(
                        deadline,
                        "update cache record",
                        self.api.replace(&self.name, &PostParams::default(), &cm),
                    )
                    .await?
                    {
                        Ok(_) => {
                            debug!("updated OIDC metadata ConfigMap {}", self.name);
                            return Ok(());
                        }
                        Err(e) if is_conflict(&e) => {
                            debug!(
                                "conflict updating OIDC metadata ConfigMap, retrying (attempt {attempt})"
                            );
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if is_not_found(&e) => {
                    let cm = ConfigMap {
                        metadata: ObjectMeta {
                            name: Some(self.name.clone()),
                            labels: Some(BTreeMap::from([
                                (LABEL_NAME.to_string(), CONTROLLER_NAME.to_string()),
                                (LABEL_COMPONENT.to_string(), "oidc-metadata".to_string()),
                            ])),
                            ..Default::default()
                        },
                        data: Some(BTreeMap::from([
                            (DISCOVERY_DATA_KEY.to_string(), discovery_json.clone()),
                            (JWKS_DATA_KEY.to_string(), jwks_json.clone()),
                        ])),
                        ..Default::default()
                    };
                    match bounded(
                        deadline,
                        "create cache record",
                        self.api.create(&PostParams::default(), &cm),
                    )
                    .await?
                    {
                        Ok(_) => {
                            info!("created OIDC metadata ConfigMap {}", self.name);
                            return Ok(());
                        }
                        // Lost the create race; retry as an update.
                        Err(e) if is_conflict(&e) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BridgeError::Fetch(format!(
            "persistent conflict writing OIDC metadata ConfigMap {}",
            self.name
        )))
    }

    /// Read and decode the record. `Ok(None)` when the record does not
    /// exist; a record missing either payload is a validation error.
    pub async fn read(&self, deadline: Deadline) -> Result<Option<CachedMetadata>> {
        let cm = match bounded(deadline, "get cache record", self.api.get(&self.name)).await? {
            Ok(cm) => cm,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&cm).map(Some)
    }

    /// Decode the payloads of an already-fetched ConfigMap (as delivered by
    /// the watcher).
    pub fn decode(cm: &ConfigMap) -> Result<CachedMetadata> {
        let data = cm
            .data
            .as_ref()
            .ok_or_else(|| BridgeError::Validation("cache record has no data".to_string()))?;

        let discovery_raw = data.get(DISCOVERY_DATA_KEY).ok_or_else(|| {
            BridgeError::Validation(format!("{DISCOVERY_DATA_KEY} not found in cache record"))
        })?;
        let jwks_raw = data.get(JWKS_DATA_KEY).ok_or_else(|| {
            BridgeError::Validation(format!("{JWKS_DATA_KEY} not found in cache record"))
        })?;

        let discovery = DiscoveryDocument::from_json(discovery_raw.as_bytes())
            .map_err(|e| BridgeError::Validation(format!("bad {DISCOVERY_DATA_KEY}: {e}")))?;
        let jwks = Jwks::from_json(jwks_raw.as_bytes())
            .map_err(|e| BridgeError::Validation(format!("bad {JWKS_DATA_KEY}: {e}")))?;

        Ok(CachedMetadata { discovery, jwks })
    }
}

/// Run a Kubernetes request against the time remaining on the deadline.
/// An elapsed deadline is a retryable fetch error; the inner result is
/// handed back for status-specific handling.
async fn bounded<T, F>(
    deadline: Deadline,
    what: &str,
    fut: F,
) -> Result<std::result::Result<T, kube::Error>>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    tokio::time::timeout(deadline.remaining(), fut)
        .await
        .map_err(|_| BridgeError::Fetch(format!("{what}: deadline exceeded")))
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(discovery: Option<&str>, jwks: Option<&str>) -> ConfigMap {
        let mut data = BTreeMap::new();
        if let Some(d) = discovery {
            data.insert(DISCOVERY_DATA_KEY.to_string(), d.to_string());
        }
        if let Some(j) = jwks {
            data.insert(JWKS_DATA_KEY.to_string(), j.to_string());
        }
        ConfigMap {
            metadata: ObjectMeta { name: Some("keymirror-oidc-metadata".to_string()), ..Default::default() },
            data: Some(data),
            ..Default::default()
        }
    }

    const DISCOVERY: &str = r#"{
      "issuer": "https://kubernetes.default.svc",
      "jwks_uri": "https://10.0.0.1/openid/v1/jwks",
      "response_types_supported": ["id_token"],
      "subject_types_supported": ["public"],
      "id_token_signing_alg_values_supported": ["RS256"]
    }"#;

    const JWKS: &str = r#"{"keys":[{"kty":"RSA","kid":"k1","n":"n","e":"AQAB"}]}"#;

    #[test]
    fn test_decode_complete_record() {
        let decoded = MetadataCache::decode(&record(Some(DISCOVERY), Some(JWKS))).unwrap();
        assert_eq!(decoded.discovery.issuer, "https://kubernetes.default.svc");
        assert_eq!(decoded.jwks.keys.len(), 1);
    }

    #[test]
    fn test_decode_missing_payload_is_validation_error() {
        let err = MetadataCache::decode(&record(Some(DISCOVERY), None)).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));

        let err = MetadataCache::decode(&record(None, Some(JWKS))).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_decode_malformed_payload_is_validation_error() {
        let err = MetadataCache::decode(&record(Some("not json"), Some(JWKS))).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }
}

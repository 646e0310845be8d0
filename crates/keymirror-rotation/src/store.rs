//! Rotation state persistence in a cluster-wide ConfigMap.

use crate::error::{Result, RotationError};
use crate::types::RotationState;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keymirror_commons::constants::{
    CONTROLLER_NAME, LABEL_COMPONENT, LABEL_NAME, ROTATION_STATE_DATA_KEY,
};
use keymirror_commons::Deadline;
use kube::api::{Api, PostParams};
use kube::Client;
use log::debug;
use std::collections::BTreeMap;
use std::future::Future;

/// Maximum load-modify-save attempts before a conflict is surfaced.
const MAX_SAVE_ATTEMPTS: usize = 5;

/// Durable storage for the rotation state. Every request runs against the
/// caller's deadline.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The current state, or an empty state when no record exists.
    async fn load(&self, deadline: Deadline) -> Result<RotationState>;

    /// Persist the state. Conflicting concurrent writers are retried
    /// internally with a bounded load-modify-save loop.
    async fn save(&self, state: &RotationState, deadline: Deadline) -> Result<()>;
}

/// `StateStore` backed by a ConfigMap in the controller namespace.
pub struct ConfigMapStateStore {
    api: Api<ConfigMap>,
    name: String,
}

impl ConfigMapStateStore {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self { api: Api::namespaced(client, namespace), name: name.to_string() }
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NAME.to_string(), CONTROLLER_NAME.to_string()),
            (LABEL_COMPONENT.to_string(), "rotation-state".to_string()),
        ])
    }

    fn is_conflict(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(ae) if ae.code == 409)
    }

    fn is_not_found(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(ae) if ae.code == 404)
    }
}

#[async_trait]
impl StateStore for ConfigMapStateStore {
    async fn load(&self, deadline: Deadline) -> Result<RotationState> {
        let cm = match bounded(deadline, "get rotation state", self.api.get(&self.name)).await? {
            Ok(cm) => cm,
            Err(e) if Self::is_not_found(&e) => {
                debug!("rotation state ConfigMap {} not found, returning empty state", self.name);
                return Ok(RotationState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(raw) = cm.data.as_ref().and_then(|d| d.get(ROTATION_STATE_DATA_KEY)) else {
            debug!("rotation state ConfigMap {} has no state field", self.name);
            return Ok(RotationState::default());
        };

        let state: RotationState = serde_json::from_str(raw)?;
        debug!(
            "loaded rotation state: {} keys, version {}",
            state.keys.len(),
            state.version
        );
        Ok(state)
    }

    async fn save(&self, state: &RotationState, deadline: Deadline) -> Result<()> {
        let serialized = serde_json::to_string(state)?;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            match bounded(deadline, "get rotation state", self.api.get(&self.name)).await? {
                Ok(mut cm) => {
                    cm.data
                        .get_or_insert_with(BTreeMap::new)
                        .insert(ROTATION_STATE_DATA_KEY.to_string(), serialized.clone());
                    cm.metadata.managed_fields = None;
                    match bounded(
                        deadline,
                        "update rotation state",
                        self.api.replace(&self.name, &PostParams::default(), &cm),
                    )
                    .await?
                    {
                        Ok(_) => {
                            debug!("saved rotation state (version {})", state.version);
                            return Ok(());
                        }
                        Err(e) if Self::is_conflict(&e) => {
                            debug!("conflict saving rotation state, retrying (attempt {attempt})");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if Self::is_not_found(&e) => {
                    let cm = ConfigMap {
                        metadata: ObjectMeta {
                            name: Some(self.name.clone()),
                            labels: Some(Self::labels()),
                            ..Default::default()
                        },
                        data: Some(BTreeMap::from([(
                            ROTATION_STATE_DATA_KEY.to_string(),
                            serialized.clone(),
                        )])),
                        ..Default::default()
                    };
                    match bounded(
                        deadline,
                        "create rotation state",
                        self.api.create(&PostParams::default(), &cm),
                    )
                    .await?
                    {
                        Ok(_) => {
                            debug!("created rotation state ConfigMap {}", self.name);
                            return Ok(());
                        }
                        // Another replica created it first; retry as update.
                        Err(e) if Self::is_conflict(&e) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RotationError::ConflictExhausted(MAX_SAVE_ATTEMPTS))
    }
}

/// Run a Kubernetes request against the time remaining on the deadline.
/// An elapsed deadline is a retryable store error; the inner result is
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
        .map_err(|_| RotationError::Store(format!("{what}: deadline exceeded")))
}

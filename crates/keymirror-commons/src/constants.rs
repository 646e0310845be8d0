//! Shared constants for controller resources and published object keys.

/// Name of the controller, used in labels and the event reporter.
pub const CONTROLLER_NAME: &str = "keymirror-controller";

/// Default namespace for controller-owned resources.
pub const DEFAULT_NAMESPACE: &str = "keymirror-system";

/// Default leader election lock (Lease) name.
pub const DEFAULT_LEADER_ELECTION_ID: &str = "keymirror-controller-leader-election";

/// ConfigMap holding the most recently fetched OIDC metadata.
pub const OIDC_METADATA_CONFIGMAP: &str = "keymirror-oidc-metadata";

/// ConfigMap holding the persisted rotation state.
pub const ROTATION_STATE_CONFIGMAP: &str = "keymirror-rotation-state";

/// ConfigMap data key for the serialized discovery document.
pub const DISCOVERY_DATA_KEY: &str = "discovery.json";

/// ConfigMap data key for the serialized JWKS.
pub const JWKS_DATA_KEY: &str = "jwks.json";

/// ConfigMap data key for the serialized rotation state.
pub const ROTATION_STATE_DATA_KEY: &str = "state";

/// Standard label keys applied to controller-owned ConfigMaps.
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Log target for the leader-only OIDC poller.
pub const COMPONENT_OIDC_POLLER: &str = "oidc-poller";

/// Log target for the leader-only aggregation poller.
pub const COMPONENT_AGGREGATION_POLLER: &str = "aggregation-poller";

/// Event reason for a successful sync.
pub const EVENT_REASON_SYNCED: &str = "Synced";

/// Event reason for a failed sync.
pub const EVENT_REASON_SYNC_FAILED: &str = "SyncFailed";

/// Event reason for a key rotation event.
pub const EVENT_REASON_KEY_ROTATION: &str = "KeyRotation";

/// Published object key for the discovery document, relative to the prefix.
pub const DISCOVERY_OBJECT_KEY: &str = ".well-known/openid-configuration";

/// Published object key for the JWKS, relative to the prefix.
pub const JWKS_OBJECT_KEY: &str = "openid/v1/jwks";

/// Sub-directory under the prefix holding per-cluster JWKS objects.
pub const CLUSTERS_OBJECT_DIR: &str = "clusters";

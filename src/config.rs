// Configuration module
use anyhow::{bail, Context, Result};
use keymirror_commons::constants::{
    DEFAULT_LEADER_ELECTION_ID, DEFAULT_NAMESPACE, OIDC_METADATA_CONFIGMAP,
    ROTATION_STATE_CONFIGMAP,
};
use keymirror_commons::validation::is_dns_label;
use keymirror_publisher::PublisherSettings;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level controller configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyMirrorConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Controller settings
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSettings {
    /// Namespace holding the controller's ConfigMaps and Lease.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Interval between leader polls of the API server, in seconds.
    #[serde(default = "default_sync_period")]
    pub sync_period_seconds: u64,
    /// How long departing keys stay published, in seconds. Zero disables
    /// the overlap.
    #[serde(default = "default_rotation_overlap")]
    pub rotation_overlap_seconds: u64,
    #[serde(default)]
    pub leader_election: LeaderElectionSettings,
    /// Enables multi-cluster shared-issuer mode. All clusters with the same
    /// group share one issuer URL; the group becomes the storage prefix.
    #[serde(default)]
    pub cluster_group: String,
    /// This cluster's identifier within the group. Required when
    /// cluster_group is set.
    #[serde(default)]
    pub cluster_id: String,
    /// Leader aggregation tick, in seconds.
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_seconds: u64,
    /// A cluster's keys are excluded once its JWKS is older than this,
    /// in seconds.
    #[serde(default = "default_cluster_ttl")]
    pub cluster_ttl_seconds: u64,
    /// Overrides the issuer written into published metadata. Empty =
    /// derived from the publisher's public URL.
    #[serde(default)]
    pub public_issuer_url: String,
    /// Name of the OIDC metadata cache ConfigMap.
    #[serde(default = "default_metadata_configmap")]
    pub metadata_configmap: String,
    /// Name of the rotation state ConfigMap.
    #[serde(default = "default_rotation_configmap")]
    pub rotation_configmap: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            sync_period_seconds: default_sync_period(),
            rotation_overlap_seconds: default_rotation_overlap(),
            leader_election: LeaderElectionSettings::default(),
            cluster_group: String::new(),
            cluster_id: String::new(),
            aggregation_interval_seconds: default_aggregation_interval(),
            cluster_ttl_seconds: default_cluster_ttl(),
            public_issuer_url: String::new(),
            metadata_configmap: default_metadata_configmap(),
            rotation_configmap: default_rotation_configmap(),
        }
    }
}

impl ControllerSettings {
    /// Whether multi-cluster shared-issuer mode is active.
    pub fn multi_cluster(&self) -> bool {
        !self.cluster_group.is_empty()
    }
}

/// Leader election settings
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderElectionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_election_id")]
    pub id: String,
}

impl Default for LeaderElectionSettings {
    fn default() -> Self {
        Self { enabled: true, id: default_election_id() }
    }
}

/// Probe/metrics HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; empty = console only.
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_log_level(), file_path: String::new(), log_to_console: true }
    }
}

impl KeyMirrorConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        let config: KeyMirrorConfig =
            toml::from_str(&raw).context("failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        if !c.cluster_group.is_empty() {
            if !is_dns_label(&c.cluster_group) {
                bail!(
                    "controller.cluster_group {:?} must match ^[a-z0-9][a-z0-9-]*[a-z0-9]$",
                    c.cluster_group
                );
            }
            if c.cluster_id.is_empty() {
                bail!("controller.cluster_id is required when controller.cluster_group is set");
            }
            if !is_dns_label(&c.cluster_id) {
                bail!(
                    "controller.cluster_id {:?} must match ^[a-z0-9][a-z0-9-]*[a-z0-9]$",
                    c.cluster_id
                );
            }
        }
        if c.sync_period_seconds == 0 {
            bail!("controller.sync_period_seconds must be positive");
        }
        self.publisher.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// The issuer URL to write into published metadata: the explicit
    /// override, or the publisher's public URL.
    pub fn public_issuer_url(&self, publisher_url: &str) -> String {
        if self.controller.public_issuer_url.is_empty() {
            publisher_url.to_string()
        } else {
            self.controller.public_issuer_url.clone()
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_sync_period() -> u64 {
    60
}

fn default_rotation_overlap() -> u64 {
    24 * 60 * 60
}

fn default_aggregation_interval() -> u64 {
    5 * 60
}

fn default_cluster_ttl() -> u64 {
    48 * 60 * 60
}

fn default_election_id() -> String {
    DEFAULT_LEADER_ELECTION_ID.to_string()
}

fn default_metadata_configmap() -> String {
    OIDC_METADATA_CONFIGMAP.to_string()
}

fn default_rotation_configmap() -> String {
    ROTATION_STATE_CONFIGMAP.to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [publisher]
        type = "s3"

        [publisher.s3]
        bucket = "my-oidc-bucket"
        region = "us-east-1"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: KeyMirrorConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.controller.namespace, "keymirror-system");
        assert_eq!(config.controller.sync_period_seconds, 60);
        assert_eq!(config.controller.rotation_overlap_seconds, 86_400);
        assert_eq!(config.controller.aggregation_interval_seconds, 300);
        assert_eq!(config.controller.cluster_ttl_seconds, 172_800);
        assert!(config.controller.leader_election.enabled);
        assert!(!config.controller.multi_cluster());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_multi_cluster_requires_cluster_id() {
        let raw = format!("{MINIMAL}\n[controller]\ncluster_group = \"prod\"\n");
        let config: KeyMirrorConfig = toml::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multi_cluster_validates_labels() {
        let raw = format!(
            "{MINIMAL}\n[controller]\ncluster_group = \"Prod\"\ncluster_id = \"aa\"\n"
        );
        let config: KeyMirrorConfig = toml::from_str(&raw).unwrap();
        assert!(config.validate().is_err());

        let raw = format!(
            "{MINIMAL}\n[controller]\ncluster_group = \"prod\"\ncluster_id = \"cluster-a\"\n"
        );
        let config: KeyMirrorConfig = toml::from_str(&raw).unwrap();
        config.validate().unwrap();
        assert!(config.controller.multi_cluster());
    }

    #[test]
    fn test_issuer_override() {
        let mut config: KeyMirrorConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.public_issuer_url("https://derived"), "https://derived");

        config.controller.public_issuer_url = "https://issuer.example.com".to_string();
        assert_eq!(config.public_issuer_url("https://derived"), "https://issuer.example.com");
    }

    #[test]
    fn test_missing_backend_section_rejected() {
        let raw = "[publisher]\ntype = \"gcs\"\n";
        let config: KeyMirrorConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}

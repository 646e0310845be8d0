//! Backend configuration: one struct per storage backend plus the
//! `[publisher]` section that selects between them.

use crate::error::{PublisherError, Result};
use keymirror_commons::validation::{is_dns_label, is_valid_bucket_name};
use serde::Deserialize;

/// Default Cache-Control header for published objects.
pub const DEFAULT_CACHE_CONTROL: &str = "max-age=300";

/// Default Content-Type header for published objects.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Which storage backend to publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    S3,
    Gcs,
    Azure,
    Oci,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::S3 => "s3",
            BackendKind::Gcs => "gcs",
            BackendKind::Azure => "azure",
            BackendKind::Oci => "oci",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `[publisher]` configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherSettings {
    #[serde(rename = "type")]
    pub backend: BackendKind,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub gcs: Option<GcsConfig>,
    #[serde(default)]
    pub azure: Option<AzureConfig>,
    #[serde(default)]
    pub oci: Option<OciConfig>,
}

impl PublisherSettings {
    /// Validate that the section for the selected backend is present and
    /// internally consistent.
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::S3 => self.s3.as_ref().ok_or_else(missing("s3"))?.validate(),
            BackendKind::Gcs => self.gcs.as_ref().ok_or_else(missing("gcs"))?.validate(),
            BackendKind::Azure => self.azure.as_ref().ok_or_else(missing("azure"))?.validate(),
            BackendKind::Oci => self.oci.as_ref().ok_or_else(missing("oci"))?.validate(),
        }
    }

    /// The configured prefix of the selected backend.
    pub fn prefix(&self) -> &str {
        match self.backend {
            BackendKind::S3 => self.s3.as_ref().map(|c| c.prefix.as_str()).unwrap_or(""),
            BackendKind::Gcs => self.gcs.as_ref().map(|c| c.prefix.as_str()).unwrap_or(""),
            BackendKind::Azure => self.azure.as_ref().map(|c| c.prefix.as_str()).unwrap_or(""),
            BackendKind::Oci => self.oci.as_ref().map(|c| c.prefix.as_str()).unwrap_or(""),
        }
    }

    /// Content-Type for published objects, with the backend override applied.
    pub fn content_type(&self) -> String {
        let override_ = match self.backend {
            BackendKind::S3 => self.s3.as_ref().and_then(|c| c.content_type.clone()),
            BackendKind::Gcs => self.gcs.as_ref().and_then(|c| c.content_type.clone()),
            BackendKind::Azure => self.azure.as_ref().and_then(|c| c.content_type.clone()),
            BackendKind::Oci => self.oci.as_ref().and_then(|c| c.content_type.clone()),
        };
        override_.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }

    /// Cache-Control for published objects, with the backend override applied.
    pub fn cache_control(&self) -> String {
        let override_ = match self.backend {
            BackendKind::S3 => self.s3.as_ref().and_then(|c| c.cache_control.clone()),
            BackendKind::Gcs => self.gcs.as_ref().and_then(|c| c.cache_control.clone()),
            BackendKind::Azure => self.azure.as_ref().and_then(|c| c.cache_control.clone()),
            BackendKind::Oci => self.oci.as_ref().and_then(|c| c.cache_control.clone()),
        };
        override_.unwrap_or_else(|| DEFAULT_CACHE_CONTROL.to_string())
    }

    /// Public HTTPS URL of the issuer root for the selected backend, with
    /// `prefix` as the effective storage prefix (the cluster group replaces
    /// the configured prefix in multi-cluster mode).
    pub fn public_url(&self, prefix: &str) -> Result<String> {
        match self.backend {
            BackendKind::S3 => Ok(self.s3.as_ref().ok_or_else(missing("s3"))?.public_url(prefix)),
            BackendKind::Gcs => Ok(self.gcs.as_ref().ok_or_else(missing("gcs"))?.public_url(prefix)),
            BackendKind::Azure => {
                Ok(self.azure.as_ref().ok_or_else(missing("azure"))?.public_url(prefix))
            }
            BackendKind::Oci => Ok(self.oci.as_ref().ok_or_else(missing("oci"))?.public_url(prefix)),
        }
    }
}

fn missing(section: &'static str) -> impl Fn() -> PublisherError {
    move || PublisherError::Config(format!("publisher.{section} configuration is required"))
}

/// AWS S3 backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Allow plain-HTTP endpoints. Only meaningful with a custom endpoint.
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl S3Config {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_bucket_name(&self.bucket) {
            return Err(PublisherError::Config(format!("invalid S3 bucket name: {}", self.bucket)));
        }
        if self.region.is_empty() {
            return Err(PublisherError::Config("S3 region is required".to_string()));
        }
        Ok(())
    }

    pub fn public_url(&self, prefix: &str) -> String {
        let base = match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        };
        join_prefix(base, prefix)
    }
}

/// Google Cloud Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
    pub project: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl GcsConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_bucket_name(&self.bucket) {
            return Err(PublisherError::Config(format!("invalid GCS bucket name: {}", self.bucket)));
        }
        if self.project.is_empty() {
            return Err(PublisherError::Config("GCS project is required".to_string()));
        }
        Ok(())
    }

    pub fn public_url(&self, prefix: &str) -> String {
        join_prefix(format!("https://storage.googleapis.com/{}", self.bucket), prefix)
    }
}

/// Azure Blob Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    pub storage_account: String,
    pub container: String,
    #[serde(default)]
    pub prefix: String,
    /// Explicit service-principal credentials. When absent the default
    /// credential chain (workload identity, environment) applies.
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl AzureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.storage_account.is_empty() {
            return Err(PublisherError::Config("Azure storage account is required".to_string()));
        }
        if !is_valid_bucket_name(&self.container) {
            return Err(PublisherError::Config(format!(
                "invalid Azure container name: {}",
                self.container
            )));
        }
        let creds =
            [&self.tenant_id, &self.client_id, &self.client_secret].iter().filter(|c| c.is_some()).count();
        if creds != 0 && creds != 3 {
            return Err(PublisherError::Config(
                "Azure credentials require tenant_id, client_id and client_secret together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn public_url(&self, prefix: &str) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.storage_account, self.container, prefix
        )
    }
}

/// OCI Object Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OciConfig {
    pub bucket: String,
    pub namespace: String,
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl OciConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_bucket_name(&self.bucket) {
            return Err(PublisherError::Config(format!("invalid OCI bucket name: {}", self.bucket)));
        }
        if !is_dns_label(&self.namespace) {
            return Err(PublisherError::Config(format!(
                "invalid OCI namespace: {}",
                self.namespace
            )));
        }
        if self.region.is_empty() {
            return Err(PublisherError::Config("OCI region is required".to_string()));
        }
        Ok(())
    }

    /// The S3-compatible endpoint OCI exposes for its object storage.
    pub fn compat_endpoint(&self) -> String {
        format!("https://{}.compat.objectstorage.{}.oraclecloud.com", self.namespace, self.region)
    }

    pub fn public_url(&self, prefix: &str) -> String {
        format!(
            "https://objectstorage.{}.oraclecloud.com/n/{}/b/{}/o/{}",
            self.region, self.namespace, self.bucket, prefix
        )
    }
}

fn join_prefix(base: String, prefix: &str) -> String {
    if prefix.is_empty() {
        base
    } else {
        format!("{base}/{prefix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config() -> S3Config {
        S3Config {
            bucket: "my-oidc-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            force_path_style: false,
            allow_http: false,
            prefix: String::new(),
            cache_control: None,
            content_type: None,
        }
    }

    #[test]
    fn test_s3_public_url() {
        assert_eq!(
            s3_config().public_url(""),
            "https://my-oidc-bucket.s3.us-east-1.amazonaws.com"
        );
        assert_eq!(
            s3_config().public_url("prod"),
            "https://my-oidc-bucket.s3.us-east-1.amazonaws.com/prod"
        );
    }

    #[test]
    fn test_s3_public_url_with_endpoint_override() {
        let mut cfg = s3_config();
        cfg.endpoint = Some("http://minio.local:9000".to_string());
        assert_eq!(cfg.public_url(""), "http://minio.local:9000/my-oidc-bucket");
        assert_eq!(cfg.public_url("prod"), "http://minio.local:9000/my-oidc-bucket/prod");
    }

    #[test]
    fn test_s3_validate_rejects_bad_bucket() {
        let mut cfg = s3_config();
        cfg.bucket = "Bad_Bucket".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_gcs_public_url() {
        let cfg = GcsConfig {
            bucket: "my-bucket".to_string(),
            project: "my-project".to_string(),
            prefix: String::new(),
            cache_control: None,
            content_type: None,
        };
        assert_eq!(cfg.public_url(""), "https://storage.googleapis.com/my-bucket");
        assert_eq!(cfg.public_url("oidc"), "https://storage.googleapis.com/my-bucket/oidc");
    }

    #[test]
    fn test_azure_public_url() {
        let cfg = AzureConfig {
            storage_account: "myaccount".to_string(),
            container: "oidc".to_string(),
            prefix: String::new(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            cache_control: None,
            content_type: None,
        };
        assert_eq!(cfg.public_url("prod"), "https://myaccount.blob.core.windows.net/oidc/prod");
    }

    #[test]
    fn test_azure_credential_triplet_enforced() {
        let cfg = AzureConfig {
            storage_account: "myaccount".to_string(),
            container: "oidc".to_string(),
            prefix: String::new(),
            tenant_id: Some("t".to_string()),
            client_id: None,
            client_secret: None,
            cache_control: None,
            content_type: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_oci_public_url_and_endpoint() {
        let cfg = OciConfig {
            bucket: "oidc-bucket".to_string(),
            namespace: "mytenancy".to_string(),
            region: "us-ashburn-1".to_string(),
            prefix: String::new(),
            cache_control: None,
            content_type: None,
        };
        assert_eq!(
            cfg.public_url("prod"),
            "https://objectstorage.us-ashburn-1.oraclecloud.com/n/mytenancy/b/oidc-bucket/o/prod"
        );
        assert_eq!(
            cfg.compat_endpoint(),
            "https://mytenancy.compat.objectstorage.us-ashburn-1.oraclecloud.com"
        );
    }

    #[test]
    fn test_settings_defaults_and_overrides() {
        let mut cfg = s3_config();
        cfg.cache_control = Some("max-age=60".to_string());
        let settings = PublisherSettings {
            backend: BackendKind::S3,
            s3: Some(cfg),
            gcs: None,
            azure: None,
            oci: None,
        };
        assert_eq!(settings.content_type(), "application/json");
        assert_eq!(settings.cache_control(), "max-age=60");
    }

    #[test]
    fn test_settings_validate_requires_backend_section() {
        let settings = PublisherSettings {
            backend: BackendKind::Gcs,
            s3: None,
            gcs: None,
            azure: None,
            oci: None,
        };
        assert!(settings.validate().is_err());
    }
}

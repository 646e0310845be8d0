//! Builds an `ObjectStore` instance for the configured backend.
//!
//! All four backends end up behind the same `Arc<dyn ObjectStore>`; the
//! storage prefix (the cluster group in multi-cluster mode) is applied
//! once here with a `PrefixStore` wrapper so every caller works with
//! prefix-relative keys.

use crate::config::{AzureConfig, BackendKind, GcsConfig, OciConfig, PublisherSettings, S3Config};
use crate::error::{PublisherError, Result};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::{ClientOptions, ObjectStore};
use std::sync::Arc;
use std::time::Duration;

/// Per-request HTTP timeout applied to every backend client.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection establishment timeout applied to every backend client.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport-level timeouts; the caller-supplied deadline bounds each
/// operation on top of these.
fn client_options() -> ClientOptions {
    ClientOptions::new()
        .with_timeout(HTTP_REQUEST_TIMEOUT)
        .with_connect_timeout(HTTP_CONNECT_TIMEOUT)
}

/// Build an `ObjectStore` from publisher settings.
///
/// `prefix` is the effective storage prefix: the cluster group when
/// multi-cluster mode is active, otherwise the backend's configured prefix.
pub fn build_object_store(
    settings: &PublisherSettings,
    prefix: &str,
) -> Result<Arc<dyn ObjectStore>> {
    settings.validate()?;

    let store: Arc<dyn ObjectStore> = match settings.backend {
        BackendKind::S3 => build_s3(settings.s3.as_ref().expect("validated"))?,
        BackendKind::Gcs => build_gcs(settings.gcs.as_ref().expect("validated"))?,
        BackendKind::Azure => build_azure(settings.azure.as_ref().expect("validated"))?,
        BackendKind::Oci => build_oci(settings.oci.as_ref().expect("validated"))?,
    };

    wrap_with_prefix(store, prefix)
}

fn build_s3(cfg: &S3Config) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(&cfg.bucket)
        .with_region(&cfg.region)
        .with_client_options(client_options());

    if let Some(ref endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if cfg.force_path_style {
        builder = builder.with_virtual_hosted_style_request(false);
    }

    builder
        .build()
        .map(|s| Arc::new(s) as Arc<dyn ObjectStore>)
        .map_err(|e| PublisherError::Config(format!("S3: {e}")))
}

fn build_gcs(cfg: &GcsConfig) -> Result<Arc<dyn ObjectStore>> {
    GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(&cfg.bucket)
        .with_client_options(client_options())
        .build()
        .map(|s| Arc::new(s) as Arc<dyn ObjectStore>)
        .map_err(|e| PublisherError::Config(format!("GCS: {e}")))
}

fn build_azure(cfg: &AzureConfig) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = MicrosoftAzureBuilder::from_env()
        .with_account(&cfg.storage_account)
        .with_container_name(&cfg.container)
        .with_client_options(client_options());

    // Explicit service-principal triplet; otherwise the environment chain
    // (workload identity, env vars) authenticates.
    if let (Some(tenant), Some(client), Some(secret)) =
        (&cfg.tenant_id, &cfg.client_id, &cfg.client_secret)
    {
        builder = builder
            .with_tenant_id(tenant)
            .with_client_id(client)
            .with_client_secret(secret);
    }

    builder
        .build()
        .map(|s| Arc::new(s) as Arc<dyn ObjectStore>)
        .map_err(|e| PublisherError::Config(format!("Azure: {e}")))
}

/// OCI has no native `object_store` backend; its S3-compatible endpoint is
/// reached through the S3 builder with path-style addressing.
fn build_oci(cfg: &OciConfig) -> Result<Arc<dyn ObjectStore>> {
    AmazonS3Builder::from_env()
        .with_bucket_name(&cfg.bucket)
        .with_region(&cfg.region)
        .with_endpoint(cfg.compat_endpoint())
        .with_virtual_hosted_style_request(false)
        .with_client_options(client_options())
        .build()
        .map(|s| Arc::new(s) as Arc<dyn ObjectStore>)
        .map_err(|e| PublisherError::Config(format!("OCI: {e}")))
}

/// Wrap a store with a `PrefixStore` when the prefix is non-empty.
pub fn wrap_with_prefix(
    store: Arc<dyn ObjectStore>,
    prefix: &str,
) -> Result<Arc<dyn ObjectStore>> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Ok(store);
    }
    let prefix_path =
        ObjectPath::parse(prefix).map_err(|e| PublisherError::Path(e.to_string()))?;
    Ok(Arc::new(PrefixStore::new(store, prefix_path)) as Arc<dyn ObjectStore>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_s3_store() {
        let settings = PublisherSettings {
            backend: BackendKind::S3,
            s3: Some(S3Config {
                bucket: "my-bucket".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                force_path_style: false,
                allow_http: false,
                prefix: String::new(),
                cache_control: None,
                content_type: None,
            }),
            gcs: None,
            azure: None,
            oci: None,
        };
        assert!(build_object_store(&settings, "").is_ok());
        assert!(build_object_store(&settings, "prod").is_ok());
    }

    #[test]
    fn test_build_rejects_missing_section() {
        let settings = PublisherSettings {
            backend: BackendKind::Oci,
            s3: None,
            gcs: None,
            azure: None,
            oci: None,
        };
        assert!(matches!(
            build_object_store(&settings, ""),
            Err(PublisherError::Config(_))
        ));
    }
}

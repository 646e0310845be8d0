//! Authenticated fetches against the API server's OIDC endpoints.
//!
//! Unlike public OIDC issuers, the Kubernetes API server requires
//! authentication on `/.well-known/openid-configuration` and
//! `/openid/v1/jwks`; the in-cluster client credentials cover both.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use keymirror_commons::{Deadline, DiscoveryDocument, Jwks};
use kube::Client;
use log::debug;

const DISCOVERY_ENDPOINT: &str = "/.well-known/openid-configuration";
const JWKS_ENDPOINT: &str = "/openid/v1/jwks";

/// The result of one successful fetch of both documents.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub discovery: DiscoveryDocument,
    pub jwks: Jwks,
    pub fetched_at: DateTime<Utc>,
}

/// Fetches OIDC metadata from the API server the client is connected to.
#[derive(Clone)]
pub struct OidcFetcher {
    client: Client,
}

impl OidcFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch and validate the discovery document.
    pub async fn fetch_discovery(&self, deadline: Deadline) -> Result<DiscoveryDocument> {
        debug!("fetching discovery document from {DISCOVERY_ENDPOINT}");
        let raw = self.get_raw(DISCOVERY_ENDPOINT, deadline).await?;

        let doc = DiscoveryDocument::from_json(raw.as_bytes())?;
        doc.validate()?;

        debug!("fetched discovery document: issuer={} jwks_uri={}", doc.issuer, doc.jwks_uri);
        Ok(doc)
    }

    /// Fetch and validate the JWKS. An empty key set is a validation
    /// failure, never published.
    pub async fn fetch_jwks(&self, deadline: Deadline) -> Result<Jwks> {
        debug!("fetching JWKS from {JWKS_ENDPOINT}");
        let raw = self.get_raw(JWKS_ENDPOINT, deadline).await?;

        let jwks = Jwks::from_json(raw.as_bytes())?;
        jwks.validate()?;

        debug!("fetched JWKS with {} keys", jwks.keys.len());
        Ok(jwks)
    }

    /// Fetch both documents under one deadline. Either endpoint failing
    /// fails the whole fetch.
    pub async fn fetch(&self, deadline: Deadline) -> Result<FetchResult> {
        let discovery = self.fetch_discovery(deadline).await?;
        let jwks = self.fetch_jwks(deadline).await?;
        Ok(FetchResult { discovery, jwks, fetched_at: Utc::now() })
    }

    async fn get_raw(&self, path: &str, deadline: Deadline) -> Result<String> {
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| BridgeError::Fetch(format!("build request for {path}: {e}")))?;

        tokio::time::timeout(deadline.remaining(), self.client.request_text(request))
            .await
            .map_err(|_| BridgeError::Fetch(format!("GET {path}: deadline exceeded")))?
            .map_err(|e| BridgeError::Fetch(format!("GET {path}: {e}")))
    }
}

//! OIDC discovery document model and the public-issuer rewrite.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// The OIDC discovery document served at `/.well-known/openid-configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    pub response_types_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    #[serde(rename = "id_token_signing_alg_values_supported")]
    pub id_token_signing_algs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Check that the document carries every field a verifier needs.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_empty() {
            return Err(ModelError::MissingField("issuer"));
        }
        if self.jwks_uri.is_empty() {
            return Err(ModelError::MissingField("jwks_uri"));
        }
        if self.response_types_supported.is_empty() {
            return Err(ModelError::MissingField("response_types_supported"));
        }
        if self.subject_types_supported.is_empty() {
            return Err(ModelError::MissingField("subject_types_supported"));
        }
        if self.id_token_signing_algs.is_empty() {
            return Err(ModelError::MissingField("id_token_signing_alg_values_supported"));
        }
        Ok(())
    }

    /// Rewrite the document for publication: the issuer becomes the public
    /// issuer URL and `jwks_uri` points at the public JWKS location. The
    /// API server's internal endpoints do not survive the rewrite except
    /// for the passthrough fields verifiers may consume.
    pub fn rewrite_for_public(&self, public_issuer: &str) -> Result<DiscoveryDocument> {
        let parsed = Url::parse(public_issuer)
            .map_err(|e| ModelError::InvalidIssuerUrl(format!("{public_issuer}: {e}")))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(ModelError::InvalidIssuerUrl(format!(
                "{public_issuer}: scheme must be http or https"
            )));
        }
        if parsed.host_str().is_none() {
            return Err(ModelError::InvalidIssuerUrl(format!("{public_issuer}: missing host")));
        }

        Ok(DiscoveryDocument {
            issuer: public_issuer.to_string(),
            jwks_uri: public_jwks_uri(public_issuer)?,
            authorization_endpoint: self.authorization_endpoint.clone(),
            token_endpoint: None,
            userinfo_endpoint: None,
            response_types_supported: self.response_types_supported.clone(),
            grant_types_supported: Vec::new(),
            subject_types_supported: self.subject_types_supported.clone(),
            id_token_signing_algs: self.id_token_signing_algs.clone(),
            claims_supported: self.claims_supported.clone(),
            scopes_supported: Vec::new(),
        })
    }

    /// Serialize to two-space indented JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Build the public JWKS URI for an issuer: `<issuer>/openid/v1/jwks` with
/// any trailing slash on the issuer path collapsed.
pub fn public_jwks_uri(issuer: &str) -> Result<String> {
    let parsed =
        Url::parse(issuer).map_err(|e| ModelError::InvalidIssuerUrl(format!("{issuer}: {e}")))?;
    let base = parsed.as_str().trim_end_matches('/');
    Ok(format!("{base}/openid/v1/jwks"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_server_document() -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: "https://kubernetes.default.svc.cluster.local".to_string(),
            jwks_uri: "https://10.96.0.1:443/openid/v1/jwks".to_string(),
            authorization_endpoint: Some("urn:kubernetes:programmatic_authorization".to_string()),
            token_endpoint: None,
            userinfo_endpoint: None,
            response_types_supported: vec!["id_token".to_string()],
            grant_types_supported: Vec::new(),
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_algs: vec!["RS256".to_string()],
            claims_supported: vec!["sub".to_string(), "iss".to_string()],
            scopes_supported: Vec::new(),
        }
    }

    #[test]
    fn test_validate_requires_core_fields() {
        let mut doc = api_server_document();
        assert!(doc.validate().is_ok());

        doc.response_types_supported.clear();
        assert!(matches!(
            doc.validate(),
            Err(ModelError::MissingField("response_types_supported"))
        ));
    }

    #[test]
    fn test_rewrite_sets_issuer_and_jwks_uri_exactly() {
        let doc = api_server_document();
        let public = "https://my-bucket.s3.us-east-1.amazonaws.com";
        let rewritten = doc.rewrite_for_public(public).unwrap();

        assert_eq!(rewritten.issuer, public);
        assert_eq!(
            rewritten.jwks_uri,
            "https://my-bucket.s3.us-east-1.amazonaws.com/openid/v1/jwks"
        );
        // Passthrough fields survive the rewrite.
        assert_eq!(rewritten.response_types_supported, doc.response_types_supported);
        assert_eq!(rewritten.subject_types_supported, doc.subject_types_supported);
        assert_eq!(rewritten.id_token_signing_algs, doc.id_token_signing_algs);
        assert_eq!(rewritten.claims_supported, doc.claims_supported);
    }

    #[test]
    fn test_rewrite_handles_prefixed_issuer() {
        let doc = api_server_document();
        let rewritten = doc
            .rewrite_for_public("https://storage.googleapis.com/my-bucket/oidc")
            .unwrap();
        assert_eq!(
            rewritten.jwks_uri,
            "https://storage.googleapis.com/my-bucket/oidc/openid/v1/jwks"
        );
    }

    #[test]
    fn test_rewrite_rejects_bad_issuer() {
        let doc = api_server_document();
        assert!(doc.rewrite_for_public("ftp://example.com").is_err());
        assert!(doc.rewrite_for_public("not a url").is_err());
    }

    #[test]
    fn test_public_jwks_uri_trims_trailing_slash() {
        assert_eq!(
            public_jwks_uri("https://example.com/oidc/").unwrap(),
            "https://example.com/oidc/openid/v1/jwks"
        );
    }

    #[test]
    fn test_json_round_trip() {
        let doc = api_server_document();
        let json = doc.to_json().unwrap();
        let decoded = DiscoveryDocument::from_json(json.as_bytes()).unwrap();
        assert_eq!(decoded, doc);
    }
}

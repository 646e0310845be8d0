//! JWK and JWKS models as served by the Kubernetes API server's
//! `/openid/v1/jwks` endpoint.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single JSON Web Key.
///
/// Only the fields the API server emits for its RSA signing keys are
/// modelled; unknown fields are dropped on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, e.g. "RSA".
    pub kty: String,
    /// Key ID. Unique within a JWKS.
    pub kid: String,
    /// Algorithm, e.g. "RS256".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key use, e.g. "sig".
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    /// Check required fields and the supported key type.
    pub fn validate(&self) -> Result<()> {
        if self.kty.is_empty() {
            return Err(ModelError::MissingField("kty"));
        }
        if self.kty != "RSA" {
            return Err(ModelError::UnsupportedKeyType(self.kty.clone()));
        }
        if self.kid.is_empty() {
            return Err(ModelError::MissingField("kid"));
        }
        if self.n.as_deref().unwrap_or("").is_empty() {
            return Err(ModelError::MissingField("n"));
        }
        if self.e.as_deref().unwrap_or("").is_empty() {
            return Err(ModelError::MissingField("e"));
        }
        Ok(())
    }
}

/// A JSON Web Key Set: an ordered list of keys with unique key IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Check that the set is non-empty, every key is valid, and key IDs
    /// are unique.
    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(ModelError::EmptyJwks);
        }
        let mut seen = HashSet::new();
        for key in &self.keys {
            key.validate()?;
            if !seen.insert(key.kid.as_str()) {
                return Err(ModelError::DuplicateKeyId(key.kid.clone()));
            }
        }
        Ok(())
    }

    /// Whether the set contains a key with the given ID.
    pub fn contains_kid(&self, kid: &str) -> bool {
        self.keys.iter().any(|k| k.kid == kid)
    }

    /// The set of key IDs.
    pub fn key_ids(&self) -> HashSet<&str> {
        self.keys.iter().map(|k| k.kid.as_str()).collect()
    }

    /// Serialize to two-space indented JSON, the layout of the published
    /// artifact.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_key(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: kid.to_string(),
            alg: Some("RS256".to_string()),
            use_: Some("sig".to_string()),
            n: Some("0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECP".to_string()),
            e: Some("AQAB".to_string()),
        }
    }

    #[test]
    fn test_jwk_validate_ok() {
        assert!(rsa_key("key-1").validate().is_ok());
    }

    #[test]
    fn test_jwk_validate_rejects_non_rsa() {
        let mut key = rsa_key("key-1");
        key.kty = "EC".to_string();
        assert!(matches!(key.validate(), Err(ModelError::UnsupportedKeyType(_))));
    }

    #[test]
    fn test_jwk_validate_rejects_missing_params() {
        let mut key = rsa_key("key-1");
        key.n = None;
        assert!(matches!(key.validate(), Err(ModelError::MissingField("n"))));

        let mut key = rsa_key("key-1");
        key.kid = String::new();
        assert!(matches!(key.validate(), Err(ModelError::MissingField("kid"))));
    }

    #[test]
    fn test_jwks_validate_rejects_empty() {
        let jwks = Jwks::default();
        assert!(matches!(jwks.validate(), Err(ModelError::EmptyJwks)));
    }

    #[test]
    fn test_jwks_validate_rejects_duplicate_kid() {
        let jwks = Jwks { keys: vec![rsa_key("key-1"), rsa_key("key-1")] };
        assert!(matches!(jwks.validate(), Err(ModelError::DuplicateKeyId(_))));
    }

    #[test]
    fn test_jwks_json_round_trip_preserves_keys() {
        let jwks = Jwks { keys: vec![rsa_key("key-1"), rsa_key("key-2")] };
        let json = jwks.to_json().unwrap();
        let decoded = Jwks::from_json(json.as_bytes()).unwrap();
        assert_eq!(decoded, jwks);
        assert_eq!(decoded.key_ids(), jwks.key_ids());
    }

    #[test]
    fn test_jwks_json_uses_two_space_indent() {
        let jwks = Jwks { keys: vec![rsa_key("key-1")] };
        let json = jwks.to_json().unwrap();
        assert!(json.contains("\n  \"keys\""));
    }

    #[test]
    fn test_jwks_decode_drops_unknown_fields() {
        let raw = r#"{"keys":[{"kty":"RSA","kid":"k1","n":"abc","e":"AQAB","x5c":["ignored"]}]}"#;
        let jwks = Jwks::from_json(raw.as_bytes()).unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid, "k1");
    }
}

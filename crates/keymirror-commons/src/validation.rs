//! Name validation helpers shared by config loading and bucket checks.

use once_cell::sync::Lazy;
use regex::Regex;

/// DNS-label shape required for cluster group and cluster ID values, which
/// become storage path components.
static DNS_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("static regex"));

/// Bucket naming rules common to the supported backends: lowercase
/// alphanumerics, hyphens and dots, alphanumeric at both ends.
static BUCKET_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*[a-z0-9]$").expect("static regex"));

/// Whether the value is a valid DNS label (`^[a-z0-9][a-z0-9-]*[a-z0-9]$`).
pub fn is_dns_label(value: &str) -> bool {
    DNS_LABEL_RE.is_match(value)
}

/// Whether the value is a valid bucket/container name (3..=63 chars).
pub fn is_valid_bucket_name(value: &str) -> bool {
    (3..=63).contains(&value.len()) && BUCKET_NAME_RE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_label() {
        assert!(is_dns_label("prod"));
        assert!(is_dns_label("cluster-a1"));
        assert!(!is_dns_label("-prod"));
        assert!(!is_dns_label("prod-"));
        assert!(!is_dns_label("Prod"));
        assert!(!is_dns_label(""));
    }

    #[test]
    fn test_bucket_name() {
        assert!(is_valid_bucket_name("my-oidc-bucket"));
        assert!(is_valid_bucket_name("my.oidc.bucket"));
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name("UPPER"));
        assert!(!is_valid_bucket_name("-leading"));
    }
}

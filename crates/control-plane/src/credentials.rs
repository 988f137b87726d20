use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Rejection cases for credential hashing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential is empty")]
    Empty,
}

/// Hash a bearer credential into the durable digest used as the join key
/// between a connection's proven identity and a node record.
///
/// The digest is deterministic and independent of incidental transport
/// formatting: surrounding whitespace is trimmed, a leaked `Bearer ` scheme
/// prefix is stripped, and all-hex credentials are lowercased so header and
/// query-parameter delivery hash to the same value.
pub fn digest_credential(raw: &str) -> Result<String, CredentialError> {
    let normalized = normalize(raw);
    if normalized.is_empty() {
        return Err(CredentialError::Empty);
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Constant-time digest comparison for authorization checks.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = match trimmed.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => trimmed,
    };

    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = digest_credential("fleet-token-1").unwrap();
        let b = digest_credential("fleet-token-1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn digest_ignores_surrounding_whitespace() {
        let bare = digest_credential("fleet-token-1").unwrap();
        let padded = digest_credential("  fleet-token-1\n").unwrap();
        assert_eq!(bare, padded);
    }

    #[test]
    fn digest_strips_leaked_bearer_scheme() {
        let bare = digest_credential("fleet-token-1").unwrap();
        let schemed = digest_credential("Bearer fleet-token-1").unwrap();
        assert_eq!(bare, schemed);
    }

    #[test]
    fn hex_credentials_hash_case_insensitively() {
        let lower = digest_credential("deadbeef01").unwrap();
        let upper = digest_credential("DEADBEEF01").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn non_hex_credentials_stay_case_sensitive() {
        let lower = digest_credential("secret-token").unwrap();
        let upper = digest_credential("SECRET-TOKEN").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn empty_credentials_are_rejected() {
        assert_eq!(digest_credential(""), Err(CredentialError::Empty));
        assert_eq!(digest_credential("   "), Err(CredentialError::Empty));
        assert_eq!(digest_credential("Bearer "), Err(CredentialError::Empty));
    }

    #[test]
    fn digests_match_requires_equal_values() {
        let a = digest_credential("a").unwrap();
        let b = digest_credential("b").unwrap();
        assert!(digests_match(&a, &a));
        assert!(!digests_match(&a, &b));
    }
}

//! Secret comparison helpers for the admin and metrics endpoints.
//!
//! Both sides are hashed to fixed-length SHA-256 digests before comparison, so
//! timing reveals neither content nor length; the digest comparison itself goes
//! through `subtle::ConstantTimeEq`.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Check an `Authorization: Bearer <token>` header value against `expected`.
pub fn bearer_matches(header: Option<&str>, expected: &[u8]) -> bool {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| constant_time_eq(token.trim().as_bytes(), expected))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_and_unequal() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"Secret"));
        assert!(!constant_time_eq(b"short", b"much longer input"));
    }

    #[test]
    fn test_bearer_header() {
        assert!(bearer_matches(Some("Bearer s3cret"), b"s3cret"));
        assert!(!bearer_matches(Some("Bearer wrong"), b"s3cret"));
        assert!(!bearer_matches(Some("s3cret"), b"s3cret"));
        assert!(!bearer_matches(None, b"s3cret"));
    }
}

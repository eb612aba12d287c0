//! Notification signature verification
//!
//! The gateway signs every notification with `sha1(unique_id + secret)`,
//! hex-encoded. Comparison is constant-time so signature checking leaks no
//! timing information about the expected digest.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Compute the expected notification signature
pub fn expected_signature(unique_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(unique_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a notification signature in constant time
pub fn verify_signature(unique_id: &str, signature: &str, secret: &str) -> bool {
    let expected = expected_signature(unique_id, secret);
    let provided = signature.trim().to_lowercase();

    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(
            expected_signature("ab", "c"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_verify_accepts_valid() {
        let sig = expected_signature("EMG-1", "whsec");
        assert!(verify_signature("EMG-1", &sig, "whsec"));
        // Case-insensitive hex
        assert!(verify_signature("EMG-1", &sig.to_uppercase(), "whsec"));
    }

    #[test]
    fn test_verify_rejects_invalid() {
        let sig = expected_signature("EMG-1", "whsec");
        assert!(!verify_signature("EMG-2", &sig, "whsec"));
        assert!(!verify_signature("EMG-1", &sig, "other-secret"));
        assert!(!verify_signature("EMG-1", "deadbeef", "whsec"));
        assert!(!verify_signature("EMG-1", "", "whsec"));
    }
}

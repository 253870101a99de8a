//! Artifact verification: SHA-256 digest checks

use sdk::errors::{InstallerError, Result};
use sha2::{Digest, Sha256};

/// Verify that the SHA-256 hash of `data` matches `expected_hex`
///
/// The comparison is case-sensitive. Returns the computed digest on success.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<String> {
    let computed = compute_hash(data);

    if computed != expected_hex {
        return Err(InstallerError::ChecksumMismatch {
            expected: expected_hex.to_string(),
            actual: computed,
        });
    }

    Ok(computed)
}

/// Compute the SHA-256 hash of `data` and return lowercase hex string
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

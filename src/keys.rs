// ============================================================================
// Key Verification Layer
// ============================================================================
//
// Two authentication tiers, both compared in constant time:
//
// - Global tier: calls that reference no subject present the shared
//   secret itself (`key == secret`).
// - Subject-scoped tier: calls that reference one identity present
//   `key == HMAC-SHA256(secret, subject_id)`, binding the token to a
//   single resource. A leaked token for member A cannot be replayed
//   against member B.
//
// The same logical event carries a different token per destination,
// because every peer has its own secret.
//
// ============================================================================

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the subject-scoped key for one peer secret and one identity.
pub fn subject_key(secret: &str, subject_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(subject_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a global-tier key. Constant-time over the full length, never
/// a short-circuit string comparison.
pub fn verify_global(presented: &str, secret: &str) -> bool {
    // ct_eq on unequal lengths returns false without leaking a prefix.
    presented.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Verify a subject-scoped key against a peer secret and subject id.
pub fn verify_subject(presented: &str, secret: &str, subject_id: &str) -> bool {
    let expected = subject_key(secret, subject_id);
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

//! Random token generation, constant-time comparison, and log redaction.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Bytes of entropy in grant identifiers and CSRF states.
const RANDOM_TOKEN_BYTES: usize = 32;

const MASK_PREFIX_LEN: usize = 4;
const MASK_SUFFIX_LEN: usize = 4;

/// Generates an unguessable URL-safe token (256 bits, base64url).
pub(crate) fn random_token() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..RANDOM_TOKEN_BYTES).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Exact byte equality without early exit.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Short stable fingerprint of a secret, safe to log.
pub(crate) fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Masks a token for display, keeping only its ends.
pub fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    let len = trimmed.chars().count();
    if len <= MASK_PREFIX_LEN + MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }
    let prefix: String = trimmed.chars().take(MASK_PREFIX_LEN).collect();
    let suffix: String = trimmed.chars().skip(len - MASK_SUFFIX_LEN).collect();
    format!("{}...{}", prefix, suffix)
}

//! API key minting and hashing. The raw key leaves the process exactly once,
//! at issuance; only its SHA-256 hex digest is ever stored.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Display prefix carried by every issued key.
pub const KEY_PREFIX: &str = "sk-or-v1-";

/// Characters of the raw key stored for display in key listings.
const DISPLAY_PREFIX_LEN: usize = 12;

/// Mint a fresh API key. Returns `(raw_key, key_hash)`.
pub fn generate_api_key() -> (String, String) {
    let mut secret = [0u8; 24];
    rand::rng().fill_bytes(&mut secret);
    let raw_key = format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(secret));
    let key_hash = hash_api_key(&raw_key);
    (raw_key, key_hash)
}

/// SHA-256 hex digest of a raw key — the stored lookup form.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// The display-only prefix of a raw key, e.g. `sk-or-v1-Ab1`.
pub fn display_prefix(raw_key: &str) -> &str {
    &raw_key[..raw_key.len().min(DISPLAY_PREFIX_LEN)]
}

//! Opaque API key hashing (C8). Keys are bearer tokens issued out of band
//! (not human passwords), so they're hashed with SHA-256 rather than
//! `bcrypt` — there's no need for a slow, salted KDF when the input already
//! has full entropy, and a fast hash keeps every request's auth lookup
//! cheap.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const KEY_PREFIX: &str = "lpe_live";

/// Mirrors the reference backend's `"btb_live_{uuid}"` opaque-token shape,
/// renamed for this service.
pub fn generate_key() -> String {
    format!("{}_{}", KEY_PREFIX, Uuid::new_v4().simple())
}

pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

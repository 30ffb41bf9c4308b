//! Authentication: opaque API-key bearer tokens, hashed and looked up
//! per request, backing the per-client rate limiter (C8).

pub mod apikey;
pub mod locate;

pub use apikey::{generate_key, hash_key};
pub use locate::{authenticate_and_throttle, AuthContext};

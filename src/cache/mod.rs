//! Response cache for the read path.
//!
//! Successful GET payloads are stored under a key derived from the method,
//! URL and canonicalized body, and served back while fresh. Expired entries
//! stay around until their retention ttl runs out so the orchestrator can
//! fall back to them when the network is gone.

mod key;
mod manager;

pub use key::{cache_key, canonical_json};
pub use manager::{CacheEntry, CacheManager};

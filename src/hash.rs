//! xxHash-based fingerprints for analyzed query trees.
//!
//! A fingerprint is a deterministic 64-bit hash of the query tree's JSON
//! form. Source locations are not serialized, so the same statement typed
//! with different whitespace hashes identically.

use xxhash_rust::xxh64;

use crate::nodes::Query;

/// Fixed seed so fingerprints are stable across processes and releases.
const SEED: u64 = 0x517cc1b727220a95;

/// Hash arbitrary bytes with the crate seed.
pub fn hash_bytes(input: &[u8]) -> u64 {
    xxh64::xxh64(input, SEED)
}

/// Fingerprint of a query tree. `query_id` itself is excluded.
pub fn query_fingerprint(query: &Query) -> u64 {
    match serde_json::to_vec(query) {
        Ok(bytes) => hash_bytes(&bytes),
        // Serialization of plain data cannot fail; fall back to the debug
        // form rather than surfacing an error from a hook.
        Err(_) => hash_bytes(format!("{query:?}").as_bytes()),
    }
}

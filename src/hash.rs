//! Stable 64-bit key hashing.
//!
//! Every structure in the crate identifies a key by its xxh64 digest: shard
//! routing, the eviction queue, expiration buckets, the offset index, the
//! bloom filter and the hot ring. The digest must be identical across process
//! restarts because the on-disk offset index is rebuilt from it, so
//! `DefaultHasher` is not an option.

use xxhash_rust::xxh64::xxh64;

/// Hashes raw key bytes.
#[inline]
pub(crate) fn hash_key(key: &[u8]) -> u64 {
    xxh64(key, 0)
}

/// Re-hashes an existing digest under `seed`.
///
/// Used by the count-min sketch to derive independent row positions from a
/// single key digest.
#[inline]
pub(crate) fn rehash(hash: u64, seed: u64) -> u64 {
    xxh64(&hash.to_le_bytes(), seed)
}

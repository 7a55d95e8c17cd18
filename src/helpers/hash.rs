use xxhash_rust::xxh3::xxh3_64;

/// Stable content-key for a tile's resolved request URI.
///
/// Used as the cache key for in-flight and ready tiles so that two tiles
/// referencing the same underlying resource (e.g. an implicit-tiling subtree
/// revisited from a different parent) collapse onto one cache slot.
pub fn hash_uri(uri: &str) -> u64 {
    xxh3_64(uri.as_bytes())
}

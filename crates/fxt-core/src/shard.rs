//! Deterministic shard selection.
//!
//! Both sharding levels (symbol → distributor, symbol → delivery channel of a
//! subscriber) use the same xxHash64 of the symbol name, so assignment is
//! reproducible across runs, platforms and builds.

/// Hash a symbol name using xxHash64 with seed 0.
#[inline]
pub fn symbol_hash(symbol: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(symbol.as_bytes(), 0)
}

/// Map a symbol hash onto one of `shard_count` shards.
///
/// `shard_count` must be non-zero; config validation guarantees this for
/// every engine-created shard set.
#[inline]
pub fn shard_index(hash: u64, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    (hash % shard_count as u64) as usize
}

/// Distributor owning `hash` among `distributors`.
#[inline]
pub fn distributor_index(hash: u64, distributors: usize) -> usize {
    shard_index(hash, distributors)
}

/// Delivery channel owning `hash` among a subscriber's `channels`.
///
/// Uses the hash with its halves swapped. With plain `hash % N` and
/// `hash % D` sharing factors, a distributor would only ever reach a fraction
/// of each subscriber's channels (D=5, N=10 leaves 8 of 10 idle).
#[inline]
pub fn channel_index(hash: u64, channels: usize) -> usize {
    shard_index(hash.rotate_left(32), channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(symbol_hash("EURUSD"), symbol_hash("EURUSD"));
        assert_ne!(symbol_hash("EURUSD"), symbol_hash("EURRUB"));
        // Known xxh64 value for the empty input with seed 0.
        assert_eq!(symbol_hash(""), 0xEF46_DB37_51D8_E999);
    }

    #[test]
    fn index_in_range() {
        for sym in ["EURUSD", "EURRUB", "USDRUB", "GBPUSD", "USDJPY"] {
            let h = symbol_hash(sym);
            for n in 1..16 {
                assert!(shard_index(h, n) < n);
            }
            assert_eq!(shard_index(h, 1), 0);
        }
    }

    #[test]
    fn channel_selection_independent_of_distributor() {
        // Plain modulo would confine distributor 0 to channels 0 and 5.
        let mut used = std::collections::HashSet::new();
        for i in 0..2_000 {
            let h = symbol_hash(&format!("SYM{i:04}"));
            if distributor_index(h, 5) == 0 {
                used.insert(channel_index(h, 10));
            }
        }
        assert!(used.len() > 2, "only {} channels reachable", used.len());
    }
}

//! Fx hash map and set aliases.
//!
//! The registries in this workspace are keyed by file paths and client ids,
//! neither of which is attacker-controlled in a way that needs SipHash, so
//! they use the Fx hasher from `rustc-hash`.
//!
//! ```
//! use cg_core::{FxHashMap, fx_hash_map};
//!
//! let mut timers: FxHashMap<String, u64> = fx_hash_map();
//! timers.insert("/data/orders.json".to_owned(), 1);
//! assert_eq!(timers.len(), 1);
//! ```

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// Creates a new empty [`FxHashMap`].
#[inline]
#[must_use]
pub fn fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

/// Creates a new empty [`FxHashSet`].
#[inline]
#[must_use]
pub fn fx_hash_set<V>() -> FxHashSet<V> {
    FxHashSet::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fx_hash_map_replaces_by_key() {
        let mut map: FxHashMap<&str, u32> = fx_hash_map();
        map.insert("/data/a.json", 1);
        map.insert("/data/a.json", 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("/data/a.json"), Some(&2));
    }

    #[test]
    fn test_fx_hash_set_dedups() {
        let mut set: FxHashSet<&str> = fx_hash_set();
        assert!(set.insert("changes"));
        assert!(!set.insert("changes"));
        assert!(set.contains("changes"));
    }
}

//! Deterministic map helpers
//!
//! Anything that walks a source, generator or cache mapping goes through
//! `sorted_keys` so that op order, cache keys and progress labels do not
//! depend on hash iteration order.

use std::collections::HashMap;
use std::hash::Hash;

/// Keys of `map` in ascending order
pub fn sorted_keys<K, V>(map: &HashMap<K, V>) -> Vec<K>
where
    K: Ord + Clone,
{
    let mut keys: Vec<K> = map.keys().cloned().collect();
    keys.sort();
    keys
}

/// Shallow, independent copy of `map`.
///
/// Callers mutate the copy without affecting the caller-owned original.
pub fn duplicate_map<K, V>(map: &HashMap<K, V>) -> HashMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

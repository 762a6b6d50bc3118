use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use color_eyre::Result;

/// Interning table: at most one shared value per key, loaded on first request
pub struct Cache<K, V> {
    entries: HashMap<K, Arc<V>>,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> Cache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    /// Returns the cached value for `key`, running `load` only when there is none yet.
    /// A failed load caches nothing.
    pub fn get_or_load(
        &mut self,
        key: K,
        load: impl FnOnce(&K) -> Result<V>,
    ) -> Result<Arc<V>> {
        if let Some(value) = self.entries.get(&key) {
            return Ok(value.clone());
        }
        let value = Arc::new(load(&key)?);
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    /// Drops every entry nothing outside the cache still holds. Returns how many went.
    pub fn optimize(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, value| Arc::strong_count(value) > 1);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    #[test]
    fn loads_once_per_key() {
        let mut cache = Cache::<&str, String>::new();
        let mut loads = 0;

        let a = cache.get_or_load("a", |key| { loads += 1; Ok(key.to_uppercase()) }).unwrap();
        let again = cache.get_or_load("a", |key| { loads += 1; Ok(key.to_uppercase()) }).unwrap();

        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(loads, 1);
        assert_eq!(*a, "A");
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let mut cache = Cache::<u32, u32>::new();
        assert!(cache.get_or_load(1, |_| Err(eyre!("missing"))).is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_load(1, |key| Ok(key * 10)).unwrap(), 10);
    }

    #[test]
    fn optimize_keeps_values_still_in_use() {
        let mut cache = Cache::<u32, u32>::new();
        let held = cache.get_or_load(1, |_| Ok(1)).unwrap();
        cache.get_or_load(2, |_| Ok(2)).unwrap();

        assert_eq!(cache.optimize(), 1);
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());

        drop(held);
        assert_eq!(cache.optimize(), 1);
        assert!(cache.is_empty());
    }
}

//! Bounded least-recently-used cache shared behind a lock.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;

struct Entries<K, V> {
    values: HashMap<K, V>,
    /// Least recently used at the front.
    recency: VecDeque<K>,
}

pub struct LruCache<K, V> {
    capacity: usize,
    entries: Mutex<Entries<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries {
                values: HashMap::with_capacity(capacity),
                recency: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let value = entries.values.get(key).cloned()?;
        touch(&mut entries.recency, key);
        Some(value)
    }

    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.values.insert(key.clone(), value).is_some() {
            touch(&mut entries.recency, &key);
            return;
        }
        entries.recency.push_back(key);
        while entries.values.len() > self.capacity {
            let Some(oldest) = entries.recency.pop_front() else {
                break;
            };
            entries.values.remove(&oldest);
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let value = entries.values.remove(key)?;
        entries.recency.retain(|k| k != key);
        Some(value)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.values.clear();
        entries.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn touch<K: PartialEq + Clone>(recency: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = recency.iter().position(|k| k == key) {
        if let Some(k) = recency.remove(pos) {
            recency.push_back(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn reinsert_replaces_value_without_growing() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(10));
    }

    #[test]
    fn remove_and_clear() {
        let cache = LruCache::new(4);
        cache.insert(1, "one");
        cache.insert(2, "two");
        assert_eq!(cache.remove(&1), Some("one"));
        assert_eq!(cache.remove(&1), None);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let cache = LruCache::new(0);
        cache.insert("a", 1);
        assert!(cache.is_empty());
    }
}

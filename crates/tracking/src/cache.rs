use std::{
    hash::Hash,
    time::{Duration, Instant},
};

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Entries live as long as the cache.
    Never,
    /// Entries expire this long after they were written.
    Ttl(Duration),
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    written: Instant,
}

/// Memo for results of external lookups. Owned by whoever is injected with it;
/// there is no process-wide instance.
///
/// With a capacity set, the oldest entry is evicted first once it is exceeded.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: IndexMap<K, Entry<V>>,
    eviction: Eviction,
    capacity: Option<usize>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(eviction: Eviction) -> Self {
        Self {
            entries: IndexMap::new(),
            eviction,
            capacity: None,
        }
    }

    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        match self.eviction {
            Eviction::Never => true,
            Eviction::Ttl(ttl) => entry.written.elapsed() < ttl,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let fresh = self.entries.get(key).map(|entry| self.is_fresh(entry))?;
        if fresh {
            self.entries.get(key).map(|entry| entry.value.clone())
        } else {
            self.entries.shift_remove(key);
            None
        }
    }

    pub fn contains(&mut self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Stores `value` unless a fresh entry for `key` exists. Returns whether
    /// the value was written.
    pub fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                value,
                written: Instant::now(),
            },
        );
        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                self.entries.shift_remove_index(0);
            }
        }
        true
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key).map(|entry| entry.value)
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

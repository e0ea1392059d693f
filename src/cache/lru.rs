// ============================================================================
// Bounded LRU map
// ============================================================================
//
// The values live in a persistent map published through an `ArcSwap`:
// readers load the current snapshot without taking any lock and stamp the
// entry they touch with a fresh tick. Writers (set, pop, clear) serialize
// on the ordering lock, build the next snapshot from the current one and
// publish it.
//
// The ordering map (tick -> key) holds exactly one entry per live key, but
// readers never update it, so its ticks may lag behind. On eviction an
// entry whose tick no longer matches its key's current tick is re-queued
// at the current tick instead of being evicted.
//
// ============================================================================

use crate::core::{DbError, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot<V> {
    value: V,
    tick: AtomicU64,
}

type Values<K, V> = im::HashMap<K, Arc<Slot<V>>>;

struct Order<K> {
    by_tick: BTreeMap<u64, K>,
    /// Tick under which each key is queued in `by_tick`.
    queued: HashMap<K, u64>,
}

impl<K: Eq + Hash + Clone> Order<K> {
    fn push(&mut self, key: K, tick: u64) {
        if let Some(old) = self.queued.insert(key.clone(), tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(tick, key);
    }

    fn remove(&mut self, key: &K) {
        if let Some(old) = self.queued.remove(key) {
            self.by_tick.remove(&old);
        }
    }

    fn len(&self) -> usize {
        self.by_tick.len()
    }
}

pub struct Lru<K, V> {
    count: usize,
    values: ArcSwap<Values<K, V>>,
    order: Mutex<Order<K>>,
    clock: AtomicU64,
}

impl<K, V> Lru<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(count: usize) -> Self {
        Self {
            count: count.max(1),
            values: ArcSwap::from_pointee(Values::new()),
            order: Mutex::new(Order {
                by_tick: BTreeMap::new(),
                queued: HashMap::new(),
            }),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Maximum number of entries.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let values = self.values.load();
        let slot = values.get(key)?;
        slot.tick.store(self.tick(), Ordering::Relaxed);
        Some(slot.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        let values = self.values.load();
        match values.get(key) {
            Some(slot) => {
                slot.tick.store(self.tick(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn set(&self, key: K, value: V) {
        let mut order = self.order.lock();
        let mut values = (*self.values.load_full()).clone();
        let tick = self.tick();
        values.insert(
            key.clone(),
            Arc::new(Slot {
                value,
                tick: AtomicU64::new(tick),
            }),
        );
        order.push(key, tick);

        while values.len() > self.count {
            let Some((tick, key)) = order.by_tick.pop_first() else {
                break;
            };
            let Some(slot) = values.get(&key) else {
                order.queued.remove(&key);
                continue;
            };
            let current = slot.tick.load(Ordering::Relaxed);
            if current != tick {
                // touched since queued
                order.push(key, current);
                continue;
            }
            order.queued.remove(&key);
            values.remove(&key);
        }
        self.values.store(Arc::new(values));
    }

    /// Removes and returns the value of `key`.
    pub fn pop(&self, key: &K) -> Result<V> {
        let mut order = self.order.lock();
        let mut values = (*self.values.load_full()).clone();
        let slot = values
            .remove(key)
            .ok_or_else(|| DbError::KeyNotFound(format!("{key:?}")))?;
        order.remove(key);
        self.values.store(Arc::new(values));
        Ok(slot.value.clone())
    }

    pub fn pop_or(&self, key: &K, default: V) -> V {
        self.pop(key).unwrap_or(default)
    }

    /// Entries from least to most recently used, copied from the current
    /// snapshot without locking.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let values = self.values.load_full();
        let mut entries: Vec<(u64, K, V)> = values
            .iter()
            .map(|(k, slot)| (slot.tick.load(Ordering::Relaxed), k.clone(), slot.value.clone()))
            .collect();
        entries.sort_by_key(|(tick, _, _)| *tick);
        entries.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    pub fn clear(&self) {
        let mut order = self.order.lock();
        order.by_tick.clear();
        order.queued.clear();
        self.values.store(Arc::new(Values::new()));
    }

    pub fn len(&self) -> usize {
        self.values.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries in the ordering structure; equal to `len()` once
    /// writers are done.
    pub fn order_len(&self) -> usize {
        self.order.lock().len()
    }
}

impl<K, V> Debug for Lru<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lru")
            .field("count", &self.count)
            .field("len", &self.values.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let lru = Lru::new(2);
        lru.set("a", 1);
        lru.set("b", 2);
        assert_eq!(lru.get(&"a"), Some(1));
        lru.set("c", 3);
        assert!(lru.contains(&"a"));
        assert!(!lru.contains(&"b"));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_pop() {
        let lru = Lru::new(4);
        lru.set("a", 1);
        assert_eq!(lru.pop(&"a").unwrap(), 1);
        assert!(matches!(lru.pop(&"a"), Err(DbError::KeyNotFound(_))));
        assert_eq!(lru.pop_or(&"a", 7), 7);
    }

    #[test]
    fn test_snapshot_is_ordered_by_recency() {
        let lru = Lru::new(4);
        lru.set("a", 1);
        lru.set("b", 2);
        lru.set("c", 3);
        lru.get(&"a");
        let keys: Vec<&str> = lru.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let lru = Lru::new(2);
        for i in 0..10 {
            lru.set("a", i);
        }
        lru.set("b", 0);
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.get(&"a"), Some(9));
    }

    #[test]
    fn test_ordering_stays_bounded_below_capacity() {
        let lru = Lru::new(8);
        for i in 0..10_000 {
            lru.set("a", i);
        }
        for i in 0..10_000 {
            lru.set("b", i);
            lru.pop(&"b").unwrap();
        }
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.order_len(), 1);
    }

    #[test]
    fn test_reader_holding_a_snapshot_does_not_block_writers() {
        let lru = Lru::new(4);
        lru.set("a", 1);
        let held = lru.values.load_full();
        lru.set("b", 2);
        lru.clear();
        assert_eq!(held.len(), 1);
        assert!(lru.is_empty());
        assert_eq!(lru.order_len(), 0);
    }
}

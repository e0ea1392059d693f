pub mod layout;
pub mod lru;
pub mod ormcache;

pub use layout::CacheLayout;
pub use lru::Lru;
pub use ormcache::{CacheKey, CacheStat, CacheValue, OrmCache, cache_stat, log_ormcache_stats};

use crate::core::{DbError, Result};
use indexmap::IndexMap;

pub type Partition = Lru<CacheKey, CacheValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    pub name: String,
    pub len: usize,
    pub count: usize,
}

/// The cache partitions of one registry.
#[derive(Debug)]
pub struct Caches {
    partitions: IndexMap<String, Partition>,
}

impl Caches {
    pub fn new(layout: &CacheLayout) -> Self {
        let partitions = layout
            .partitions
            .iter()
            .map(|(name, size)| (name.clone(), Lru::new(*size)))
            .collect();
        Self { partitions }
    }

    pub fn get(&self, name: &str) -> Result<&Partition> {
        self.partitions
            .get(name)
            .ok_or_else(|| DbError::KeyNotFound(format!("cache partition '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    pub fn clear(&self, name: &str) -> Result<()> {
        self.get(name)?.clear();
        Ok(())
    }

    pub fn clear_all(&self) {
        for lru in self.partitions.values() {
            lru.clear();
        }
    }

    pub fn stats(&self) -> Vec<PartitionStats> {
        self.partitions
            .iter()
            .map(|(name, lru)| PartitionStats {
                name: name.clone(),
                len: lru.len(),
                count: lru.count(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use std::sync::Arc;

    fn key(n: i64) -> CacheKey {
        CacheKey {
            model: "m".into(),
            method: "f".into(),
            args: vec![Value::Integer(n)],
        }
    }

    #[test]
    fn test_partitions_are_independent() {
        let caches = Caches::new(&CacheLayout::default());
        caches.get("assets").unwrap().set(key(1), Arc::new(1i64));
        caches.get("templates").unwrap().set(key(1), Arc::new(2i64));
        caches.clear("assets").unwrap();
        assert!(caches.get("assets").unwrap().is_empty());
        assert_eq!(caches.get("templates").unwrap().len(), 1);

        caches.clear_all();
        assert!(caches.stats().iter().all(|s| s.len == 0));
    }

    #[test]
    fn test_partition_sizes_follow_layout() {
        let caches = Caches::new(&CacheLayout::default());
        let groups = caches.stats().into_iter().find(|s| s.name == "groups").unwrap();
        assert_eq!(groups.count, 8);
        assert!(caches.get("unknown").is_err());
    }
}

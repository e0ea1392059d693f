// ============================================================================
// Method-result memoization
// ============================================================================
//
// An `OrmCache` describes one memoized method: its identity and the cache
// partition holding its results. Entries are keyed by the owning model, the
// method identity and the arguments the caller picked as cache key.
// Statistics are process-wide, per (database, method).
//
// ============================================================================

use super::Caches;
use crate::core::{Result, Value};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type CacheValue = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStat {
    pub hit: u64,
    pub miss: u64,
    pub err: u64,
    pub gen_time: Duration,
}

impl CacheStat {
    pub fn ratio(&self) -> f64 {
        let total = self.hit + self.miss;
        if total == 0 {
            0.0
        } else {
            100.0 * self.hit as f64 / total as f64
        }
    }
}

lazy_static! {
    static ref STATS: Mutex<BTreeMap<(String, String), CacheStat>> = Mutex::new(BTreeMap::new());
}

fn record(dbname: &str, method: &str, update: impl FnOnce(&mut CacheStat)) {
    let mut stats = STATS.lock();
    update(
        stats
            .entry((dbname.to_string(), method.to_string()))
            .or_default(),
    );
}

/// Statistics of a method on a database.
pub fn cache_stat(dbname: &str, method: &str) -> CacheStat {
    STATS
        .lock()
        .get(&(dbname.to_string(), method.to_string()))
        .copied()
        .unwrap_or_default()
}

/// A memoized method.
#[derive(Debug, Clone)]
pub struct OrmCache {
    method: String,
    partition: String,
}

impl OrmCache {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            partition: "default".into(),
        }
    }

    pub fn in_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    fn key(&self, model: &str, args: Vec<Value>) -> CacheKey {
        CacheKey {
            model: model.to_string(),
            method: self.method.clone(),
            args,
        }
    }

    /// Returns the cached result for `args`, computing and storing it on a
    /// miss. A failed computation is not cached.
    pub fn lookup<T, F>(
        &self,
        caches: &Caches,
        dbname: &str,
        model: &str,
        args: Vec<Value>,
        compute: F,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        let lru = caches.get(&self.partition)?;
        let key = self.key(model, args);

        if let Some(value) = lru.get(&key) {
            match value.downcast::<T>() {
                Ok(value) => {
                    record(dbname, &self.method, |s| s.hit += 1);
                    return Ok(value);
                }
                Err(_) => {
                    log::warn!(
                        target: "ormregistry::cache",
                        "cached value of {}.{} has an unexpected type, recomputing",
                        model,
                        self.method
                    );
                    record(dbname, &self.method, |s| s.err += 1);
                }
            }
        }

        let start = Instant::now();
        let computed = compute();
        let elapsed = start.elapsed();
        let value = match computed {
            Ok(value) => Arc::new(value),
            Err(e) => {
                record(dbname, &self.method, |s| s.err += 1);
                return Err(e);
            }
        };
        record(dbname, &self.method, |s| {
            s.miss += 1;
            s.gen_time += elapsed;
        });
        lru.set(key, Arc::clone(&value) as CacheValue);
        Ok(value)
    }

    /// Drops the cached result for `args`, if any.
    pub fn invalidate(&self, caches: &Caches, model: &str, args: Vec<Value>) -> Result<bool> {
        let lru = caches.get(&self.partition)?;
        Ok(lru.pop(&self.key(model, args)).is_ok())
    }
}

/// Logs the size of every partition, then the statistics of every memoized
/// method of `dbname`.
pub fn log_ormcache_stats(dbname: &str, caches: &Caches) {
    for stat in caches.stats() {
        log::info!(
            target: "ormregistry::cache",
            "{:>24}: {:>6} entries (max {})",
            stat.name,
            stat.len,
            stat.count
        );
    }
    let stats = STATS.lock();
    for ((db, method), stat) in stats.iter().filter(|((db, _), _)| db == dbname) {
        log::info!(
            target: "ormregistry::cache",
            "{db} {method}: hit={} miss={} err={} ratio={:.1}% gen_time={:?}",
            stat.hit,
            stat.miss,
            stat.err,
            stat.ratio(),
            stat.gen_time
        );
    }
}

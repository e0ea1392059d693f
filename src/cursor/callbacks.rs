use crate::core::{Params, Result};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::{HashMap, VecDeque};

type Callback = Box<dyn FnOnce(&mut Callbacks) -> Result<()> + Send>;

/// A FIFO of functions run once, at some transaction boundary.
///
/// A callback receives the collection it is run from, so it may queue more
/// callbacks: those run within the same `run`. The `data` side map lets
/// several callbacks aggregate work (e.g. collect ids, act once).
#[derive(Default)]
pub struct Callbacks {
    funcs: VecDeque<Callback>,
    data: HashMap<String, Box<dyn Any + Send>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, func: impl FnOnce(&mut Callbacks) -> Result<()> + Send + 'static) {
        self.funcs.push_back(Box::new(func));
    }

    /// Runs every callback in order, including the ones queued meanwhile,
    /// then clears the collection. The first error stops the run and drops
    /// the callbacks left.
    pub fn run(&mut self) -> Result<()> {
        while let Some(func) = self.funcs.pop_front() {
            if let Err(e) = func(self) {
                self.clear();
                return Err(e);
            }
        }
        self.clear();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.funcs.clear();
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Shared value stored under `key`, created with `Default` on first use.
    ///
    /// Returns `None` if the key already holds a value of another type.
    pub fn data<T: Default + Send + 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.data
            .entry(key.to_string())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("pending", &self.funcs.len())
            .field("data_keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Transaction boundary hooks and transaction-local state of a cursor.
#[derive(Debug, Default)]
pub struct Hooks {
    /// Run by `flush()`, hence before every commit.
    pub precommit: Callbacks,
    /// Run after a successful commit; discarded by a rollback.
    pub postcommit: Callbacks,
    pub prerollback: Callbacks,
    pub postrollback: Callbacks,
    pub(crate) deferred: Vec<(String, Params)>,
    pub(crate) now: Option<DateTime<Utc>>,
}

impl Hooks {
    /// Statements waiting for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;

    #[test]
    fn test_run_is_fifo_and_includes_late_additions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut callbacks = Callbacks::new();

        let l = Arc::clone(&log);
        callbacks.add(move |cbs| {
            l.lock().push(1);
            let l2 = Arc::clone(&l);
            cbs.add(move |_| {
                l2.lock().push(3);
                Ok(())
            });
            Ok(())
        });
        let l = Arc::clone(&log);
        callbacks.add(move |_| {
            l.lock().push(2);
            Ok(())
        });

        callbacks.run().unwrap();
        assert_eq!(*log.lock(), vec![1, 2, 3]);
        assert!(callbacks.is_empty());

        // nothing runs twice
        callbacks.run().unwrap();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_data_aggregates_across_callbacks() {
        let mut callbacks = Callbacks::new();
        callbacks.data::<Vec<i64>>("ids").unwrap().push(1);
        callbacks.data::<Vec<i64>>("ids").unwrap().push(2);
        assert_eq!(callbacks.data::<Vec<i64>>("ids").unwrap(), &vec![1, 2]);
        assert!(callbacks.data::<String>("ids").is_none());

        callbacks.clear();
        assert!(callbacks.data::<Vec<i64>>("ids").unwrap().is_empty());
    }

    #[test]
    fn test_error_stops_run() {
        let mut callbacks = Callbacks::new();
        callbacks.add(|_| Err(crate::core::DbError::query("boom")));
        callbacks.add(|_| panic!("must not run"));
        assert!(callbacks.run().is_err());
        assert!(callbacks.is_empty());
    }
}

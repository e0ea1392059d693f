// ============================================================================
// Transaction Manager
// ============================================================================
//
// Owns the committed state of one database. Transactions start from a clone
// of it; COMMIT replays the transaction's change log on the latest committed
// state under the write lock and publishes the result.
//
// ============================================================================

use super::{Change, Transaction};
use crate::core::Result;
use crate::storage::DatabaseState;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct TransactionManager {
    committed: RwLock<DatabaseState>,
    commits: AtomicU64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(DatabaseState::new()),
            commits: AtomicU64::new(0),
        }
    }

    pub fn begin(&self, readonly: bool) -> Transaction {
        Transaction::begin(self.committed.read().clone(), readonly)
    }

    /// Latest committed state, outside of any transaction.
    pub fn snapshot(&self) -> DatabaseState {
        self.committed.read().clone()
    }

    /// Publishes the changes of `tx`. Nothing is published when replaying
    /// fails (the concurrent winner stays).
    pub fn commit(&self, tx: Transaction) -> Result<()> {
        if !tx.is_dirty() {
            return Ok(());
        }
        let log: Vec<Change> = tx.into_log();

        let mut committed = self.committed.write();
        let mut next = committed.clone();
        for change in &log {
            next.apply(change).map_err(|e| {
                crate::core::DbError::query(format!(
                    "could not serialize access due to concurrent update: {e}"
                ))
            })?;
        }
        *committed = next;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

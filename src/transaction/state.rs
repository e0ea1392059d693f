// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction owns a working copy of the database state, taken from the
// committed state when it begins (snapshot isolation), and the log of
// changes it made. Savepoints are frames holding the working copy and the
// log length at the time they were set.
//
// State transitions:
//   Active --error--> Failed --ROLLBACK TO SAVEPOINT--> Active
//   Active/Failed --COMMIT/ROLLBACK--> (dropped)
//
// ============================================================================

use super::Change;
use crate::core::{DbError, Result};
use crate::storage::DatabaseState;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    /// A statement failed; only a rollback (to a savepoint) is accepted.
    Failed,
}

#[derive(Debug, Clone)]
struct SavepointFrame {
    name: String,
    state: DatabaseState,
    log_len: usize,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    working: DatabaseState,
    log: Vec<Change>,
    savepoints: Vec<SavepointFrame>,
    status: TransactionStatus,
    readonly: bool,
    started_at: DateTime<Utc>,
}

impl Transaction {
    pub fn begin(snapshot: DatabaseState, readonly: bool) -> Self {
        Self {
            working: snapshot,
            log: Vec::new(),
            savepoints: Vec::new(),
            status: TransactionStatus::Active,
            readonly,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> &DatabaseState {
        &self.working
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Transaction timestamp, as returned by `now()`.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_dirty(&self) -> bool {
        !self.log.is_empty()
    }

    pub fn check_active(&self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Failed => Err(DbError::query(
                "current transaction is aborted, commands ignored until end of transaction block",
            )),
        }
    }

    pub fn check_writable(&self, what: &str) -> Result<()> {
        if self.readonly {
            return Err(DbError::query(format!(
                "cannot execute {what} in a read-only transaction"
            )));
        }
        Ok(())
    }

    pub fn mark_failed(&mut self) {
        self.status = TransactionStatus::Failed;
    }

    /// Applies a change to the working copy and records it.
    pub fn apply(&mut self, change: Change) -> Result<()> {
        self.working.apply(&change)?;
        self.log.push(change);
        Ok(())
    }

    /// Statement-level atomicity: position to restore if a statement fails half-way.
    pub(crate) fn mark(&self) -> (DatabaseState, usize) {
        (self.working.clone(), self.log.len())
    }

    pub(crate) fn restore(&mut self, mark: (DatabaseState, usize)) {
        self.working = mark.0;
        self.log.truncate(mark.1);
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.check_active()?;
        self.savepoints.push(SavepointFrame {
            name: name.to_string(),
            state: self.working.clone(),
            log_len: self.log.len(),
        });
        Ok(())
    }

    /// Releases the named savepoint and every savepoint set after it.
    pub fn release(&mut self, name: &str) -> Result<()> {
        self.check_active()?;
        let pos = self.find_savepoint(name)?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    /// Restores the state as of the named savepoint, which stays defined.
    pub fn rollback_to(&mut self, name: &str) -> Result<()> {
        let pos = self.find_savepoint(name)?;
        self.savepoints.truncate(pos + 1);
        let frame = &self.savepoints[pos];
        self.working = frame.state.clone();
        self.log.truncate(frame.log_len);
        self.status = TransactionStatus::Active;
        Ok(())
    }

    pub fn savepoint_depth(&self) -> usize {
        self.savepoints.len()
    }

    fn find_savepoint(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|frame| frame.name == name)
            .ok_or_else(|| DbError::query(format!("savepoint \"{name}\" does not exist")))
    }

    /// Consumes the transaction, yielding its change log.
    pub fn into_log(self) -> Vec<Change> {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};
    use crate::storage::TableSchema;

    fn tx_with_table() -> Transaction {
        let mut tx = Transaction::begin(DatabaseState::new(), false);
        tx.apply(Change::CreateTable {
            schema: TableSchema::new("t", vec![Column::new("x", DataType::Text)]).unwrap(),
        })
        .unwrap();
        tx
    }

    fn insert(tx: &mut Transaction, id: u64, x: &str) {
        tx.apply(Change::InsertRow {
            table: "t".into(),
            row_id: id,
            row: vec![Value::from(x)],
        })
        .unwrap();
    }

    #[test]
    fn test_rollback_to_savepoint_restores_state_and_log() {
        let mut tx = tx_with_table();
        insert(&mut tx, 1, "A");
        tx.savepoint("sp").unwrap();
        insert(&mut tx, 2, "B");
        tx.mark_failed();
        assert!(tx.check_active().is_err());

        tx.rollback_to("sp").unwrap();
        assert_eq!(tx.status(), TransactionStatus::Active);
        assert_eq!(tx.state().table("t").unwrap().len(), 1);
        assert_eq!(tx.savepoint_depth(), 1);
        assert_eq!(tx.into_log().len(), 2);
    }

    #[test]
    fn test_release_drops_nested_savepoints() {
        let mut tx = tx_with_table();
        tx.savepoint("a").unwrap();
        tx.savepoint("b").unwrap();
        tx.release("a").unwrap();
        assert_eq!(tx.savepoint_depth(), 0);
        assert!(tx.rollback_to("b").is_err());
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let tx = Transaction::begin(DatabaseState::new(), true);
        assert!(tx.check_writable("INSERT").is_err());
    }
}

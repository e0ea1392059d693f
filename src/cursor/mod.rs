// ============================================================================
// Cursors
// ============================================================================
//
// Transaction boundary ordering shared by every cursor:
//
//   commit:   flush -> physical commit -> clear -> drop rollback hooks
//             -> run postcommit
//   rollback: clear -> drop postcommit -> run prerollback
//             -> physical rollback -> run postrollback
//
// ============================================================================

mod callbacks;
mod cursor;
mod database;
mod savepoint;
mod test_cursor;

pub use callbacks::{Callbacks, Hooks};
pub use cursor::{Cursor, sql_counter};
pub use database::Database;
pub use savepoint::{Savepoint, with_savepoint};
pub use test_cursor::{TestCursor, TestLock, TestSession};

use crate::core::{DbError, Params, Result, Value};
use crate::result::QueryResult;
use chrono::{DateTime, Utc};

/// Maximum number of ids put in one `IN (...)` clause.
pub const IN_MAX: usize = 1000;

/// Common contract of real and test cursors.
pub trait BaseCursor: Send {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<QueryResult>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Idempotent.
    fn close(&mut self) -> Result<()>;

    fn closed(&self) -> bool;

    fn readonly(&self) -> bool;

    fn dbname(&self) -> &str;

    fn hooks(&mut self) -> &mut Hooks;

    /// Queues a write executed by the next `flush()`.
    fn defer(&mut self, sql: &str, params: Params) {
        self.hooks().deferred.push((sql.to_string(), params));
    }

    /// Executes the pending writes, then the precommit hooks.
    fn flush(&mut self) -> Result<()> {
        let deferred = std::mem::take(&mut self.hooks().deferred);
        for (sql, params) in deferred {
            self.execute(&sql, &params)?;
        }
        self.hooks().precommit.run()
    }

    /// Drops the transaction-local state: pending writes and precommit hooks.
    fn clear(&mut self) {
        let hooks = self.hooks();
        hooks.deferred.clear();
        hooks.precommit.clear();
    }

    /// Transaction timestamp, fetched once per transaction.
    fn now(&mut self) -> Result<DateTime<Utc>> {
        if let Some(now) = self.hooks().now {
            return Ok(now);
        }
        let result = self.execute("SELECT now()", &Params::None)?;
        let now = match result.scalar()? {
            Value::Timestamp(ts) => *ts,
            other => {
                return Err(DbError::Interface(format!(
                    "now() returned a {} value",
                    other.type_name()
                )));
            }
        };
        self.hooks().now = Some(now);
        Ok(now)
    }

    fn savepoint(&mut self, flush: bool) -> Result<Savepoint<'_, Self>>
    where
        Self: Sized,
    {
        Savepoint::new(self, flush)
    }
}

impl<C: BaseCursor + ?Sized> BaseCursor for Box<C> {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        (**self).execute(sql, params)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn closed(&self) -> bool {
        (**self).closed()
    }

    fn readonly(&self) -> bool {
        (**self).readonly()
    }

    fn dbname(&self) -> &str {
        (**self).dbname()
    }

    fn hooks(&mut self) -> &mut Hooks {
        (**self).hooks()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn now(&mut self) -> Result<DateTime<Utc>> {
        (**self).now()
    }
}

/// Runs `f` as a unit of work: commits when it succeeds, and closes the
/// cursor in every case.
pub fn scoped<C: BaseCursor, T>(mut cr: C, f: impl FnOnce(&mut C) -> Result<T>) -> Result<T> {
    match f(&mut cr) {
        Ok(value) => {
            let committed = cr.commit();
            let closed = cr.close();
            committed?;
            closed?;
            Ok(value)
        }
        Err(e) => {
            if let Err(close_err) = cr.close() {
                log::warn!(target: "ormregistry::sql_db", "closing cursor after failure: {close_err}");
            }
            Err(e)
        }
    }
}

/// Splits ids into chunks small enough for an `IN (...)` clause.
pub fn split_for_in_conditions<T>(ids: &[T], size: Option<usize>) -> std::slice::Chunks<'_, T> {
    ids.chunks(size.unwrap_or(IN_MAX).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_for_in_conditions() {
        let ids: Vec<i64> = (0..2500).collect();
        let sizes: Vec<usize> = split_for_in_conditions(&ids, None).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(split_for_in_conditions(&ids[..3], Some(2)).count(), 2);
    }
}

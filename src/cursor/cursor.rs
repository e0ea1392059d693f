use super::{BaseCursor, Hooks};
use crate::connection::{ConnectionPool, PooledConnection};
use crate::core::{DbError, Params, Result};
use crate::result::QueryResult;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

lazy_static! {
    static ref RE_FROM: Regex = Regex::new(r#"(?i)\bfrom\s+"?([a-z_0-9]+)\b"#).unwrap();
    static ref RE_INTO: Regex = Regex::new(r#"(?i)\binto\s+"?([a-z_0-9]+)\b"#).unwrap();
}

static SQL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Statements executed by every cursor of the process.
pub fn sql_counter() -> u64 {
    SQL_COUNTER.load(Ordering::Relaxed)
}

#[derive(Default)]
struct TableLog {
    calls: usize,
    elapsed: Duration,
}

/// A cursor over a pooled connection, in a single transaction until
/// `commit`/`rollback`.
///
/// Dropping an open cursor logs a warning naming where it was created and
/// flags its connection as leaked; the pool frees it later.
pub struct Cursor {
    pool: Arc<ConnectionPool>,
    conn: Option<Arc<PooledConnection>>,
    dbname: String,
    keep_in_pool: bool,
    /// Read-only session on a read/write connection, undone on close.
    readonly_session: bool,
    hooks: Hooks,
    sql_log_count: usize,
    sql_from_log: HashMap<String, TableLog>,
    sql_into_log: HashMap<String, TableLog>,
    created_at: &'static Location<'static>,
}

impl Cursor {
    #[track_caller]
    pub fn new(
        pool: Arc<ConnectionPool>,
        info: &crate::connection::config::ConnectionInfo,
        keep_in_pool: bool,
    ) -> Result<Self> {
        let created_at = Location::caller();
        let conn = pool.borrow(info)?;
        Ok(Self {
            pool,
            conn: Some(conn),
            dbname: info.database.clone(),
            keep_in_pool,
            readonly_session: false,
            hooks: Hooks::default(),
            sql_log_count: 0,
            sql_from_log: HashMap::new(),
            sql_into_log: HashMap::new(),
            created_at,
        })
    }

    fn connection(&self) -> Result<&Arc<PooledConnection>> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::Interface("Cursor already closed".into()))
    }

    /// Makes the transactions of this cursor read-only, for a read-only
    /// cursor served by a read/write pool.
    pub fn set_readonly_session(&mut self) -> Result<()> {
        self.connection()?.set_readonly(true)?;
        self.readonly_session = true;
        Ok(())
    }

    /// Statements executed by this cursor.
    pub fn sql_log_count(&self) -> usize {
        self.sql_log_count
    }

    /// Server session identifier of the underlying connection.
    pub fn backend_id(&self) -> Result<u64> {
        Ok(self.connection()?.backend_id())
    }

    fn record_tables(&mut self, sql: &str, delay: Duration) {
        for (re, log) in [
            (&*RE_FROM, &mut self.sql_from_log),
            (&*RE_INTO, &mut self.sql_into_log),
        ] {
            if let Some(caps) = re.captures(sql) {
                let entry = log.entry(caps[1].to_string()).or_default();
                entry.calls += 1;
                entry.elapsed += delay;
            }
        }
    }

    fn print_log(&mut self) {
        if !log::log_enabled!(target: "ormregistry::sql_db", log::Level::Debug) {
            return;
        }
        for (kind, table_log) in [("from", &self.sql_from_log), ("into", &self.sql_into_log)] {
            let mut entries: Vec<_> = table_log.iter().collect();
            entries.sort_by(|a, b| b.1.elapsed.cmp(&a.1.elapsed));
            let mut total = Duration::ZERO;
            for (table, entry) in entries {
                log::debug!(
                    target: "ormregistry::sql_db",
                    "table: {table}: {:?}/{}",
                    entry.elapsed,
                    entry.calls
                );
                total += entry.elapsed;
            }
            log::debug!(target: "ormregistry::sql_db", "SUM {kind}:{total:?}");
        }
        self.sql_from_log.clear();
        self.sql_into_log.clear();
    }

    fn close_impl(&mut self, leak: bool) -> Result<()> {
        let Some(live) = self.conn.as_ref().map(|conn| !conn.is_closed()) else {
            return Ok(());
        };
        // discard the pending work and run the rollback hooks
        if live && let Err(e) = self.rollback() {
            log::warn!(target: "ormregistry::sql_db", "rollback on close of {}: {e}", self.dbname);
        }
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.print_log();
        self.hooks = Hooks::default();
        if self.readonly_session && !conn.is_closed() {
            if let Err(e) = conn.set_readonly(false) {
                log::warn!(target: "ormregistry::sql_db", "restoring read/write session: {e}");
            }
            self.readonly_session = false;
        }

        if leak {
            conn.mark_leaked();
            return Ok(());
        }
        match self.pool.give_back(&conn, self.keep_in_pool) {
            // a broken connection may already be forgotten by the pool
            Err(DbError::Pool(_)) if conn.is_closed() => Ok(()),
            other => other,
        }
    }
}

impl BaseCursor for Cursor {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        let conn = Arc::clone(self.connection()?);

        let start = Instant::now();
        let result = conn.execute(sql, params);
        let delay = start.elapsed();

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                log::error!(target: "ormregistry::sql_db", "bad query: {sql}\nERROR: {e}");
                return Err(e);
            }
        };

        self.sql_log_count += 1;
        SQL_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: "ormregistry::sql_db", elapsed = ?delay, rows = result.rowcount, "{sql}");

        if log::log_enabled!(target: "ormregistry::sql_db", log::Level::Debug) {
            self.record_tables(sql, delay);
        }
        Ok(result)
    }

    fn commit(&mut self) -> Result<()> {
        let conn = Arc::clone(self.connection()?);
        self.flush()?;
        conn.commit()?;
        self.clear();
        self.hooks.now = None;
        self.hooks.prerollback.clear();
        self.hooks.postrollback.clear();
        self.hooks.postcommit.run()
    }

    fn rollback(&mut self) -> Result<()> {
        let conn = Arc::clone(self.connection()?);
        self.clear();
        self.hooks.postcommit.clear();
        self.hooks.prerollback.run()?;
        conn.rollback()?;
        self.hooks.now = None;
        self.hooks.postrollback.run()
    }

    fn close(&mut self) -> Result<()> {
        self.close_impl(false)
    }

    fn closed(&self) -> bool {
        self.conn.is_none()
    }

    fn readonly(&self) -> bool {
        self.pool.is_readonly() || self.readonly_session
    }

    fn dbname(&self) -> &str {
        &self.dbname
    }

    fn hooks(&mut self) -> &mut Hooks {
        &mut self.hooks
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.conn.is_some() {
            log::warn!(
                target: "ormregistry::sql_db",
                "Cursor not closed explicitly\nCursor was created at {}",
                self.created_at
            );
            if let Err(e) = self.close_impl(true) {
                log::warn!(target: "ormregistry::sql_db", "closing leaked cursor: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("dbname", &self.dbname)
            .field("closed", &self.conn.is_none())
            .field("created_at", &self.created_at.to_string())
            .finish()
    }
}

use super::config::ConnectionInfo;
use super::{Driver, RawConnection};
use crate::core::{DbError, Params, Result};
use crate::result::QueryResult;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Connections idle longer than this are closed on the next borrow.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// A physical connection owned by a [`ConnectionPool`].
///
/// Handed out as `Arc<PooledConnection>`; the pool keeps its own reference
/// so it can close connections it considers idle or broken.
pub struct PooledConnection {
    info: ConnectionInfo,
    backend_id: u64,
    raw: Mutex<Box<dyn RawConnection>>,
    leaked: AtomicBool,
}

impl PooledConnection {
    fn new(info: ConnectionInfo, raw: Box<dyn RawConnection>) -> Self {
        Self {
            info,
            backend_id: raw.backend_id(),
            raw: Mutex::new(raw),
            leaked: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn dbname(&self) -> &str {
        &self.info.database
    }

    pub fn backend_id(&self) -> u64 {
        self.backend_id
    }

    pub fn execute(&self, sql: &str, params: &Params) -> Result<QueryResult> {
        self.raw.lock().execute(sql, params)
    }

    pub fn commit(&self) -> Result<()> {
        self.raw.lock().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.raw.lock().rollback()
    }

    pub fn is_closed(&self) -> bool {
        self.raw.lock().is_closed()
    }

    pub(crate) fn set_readonly(&self, readonly: bool) -> Result<()> {
        self.raw.lock().set_readonly(readonly)
    }

    fn reset(&self) -> Result<()> {
        self.raw.lock().reset()
    }

    fn close(&self) {
        self.raw.lock().close()
    }

    /// Flags a connection whose cursor was dropped without being closed;
    /// the pool frees it on its next borrow.
    pub(crate) fn mark_leaked(&self) {
        self.leaked.store(true, Ordering::SeqCst);
    }
}

struct PoolEntry {
    conn: Arc<PooledConnection>,
    used: bool,
    last_used: Instant,
}

/// Connection pool
///
/// Never waits: when every connection is in use and none can be evicted,
/// `borrow` fails with [`DbError::PoolExhausted`].
pub struct ConnectionPool {
    driver: Arc<dyn Driver>,
    maxconn: usize,
    readonly: bool,
    idle_timeout: Duration,
    /// Ordered by last release, oldest first.
    entries: Mutex<Vec<PoolEntry>>,
}

impl ConnectionPool {
    pub fn new(driver: Arc<dyn Driver>, maxconn: usize) -> Self {
        Self {
            driver,
            maxconn: maxconn.max(1),
            readonly: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Pool whose connections open read-only transactions.
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn maxconn(&self) -> usize {
        self.maxconn
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Borrow a connection to `info`, reusing an idle one when possible.
    pub fn borrow(&self, info: &ConnectionInfo) -> Result<Arc<PooledConnection>> {
        let mut entries = self.entries.lock();
        self.collect_garbage(&mut entries);

        let mut i = 0;
        while i < entries.len() {
            let entry = &entries[i];
            if entry.used || !entry.conn.info.dsn_equals(info) {
                i += 1;
                continue;
            }
            match entry.conn.reset() {
                Ok(()) => {
                    let entry = &mut entries[i];
                    entry.used = true;
                    entry.last_used = Instant::now();
                    log::debug!(
                        target: "ormregistry::sql_db",
                        "{}: borrow existing connection to {} (backend {})",
                        self.label(),
                        info,
                        entry.conn.backend_id
                    );
                    return Ok(Arc::clone(&entry.conn));
                }
                Err(e) => {
                    log::info!(
                        target: "ormregistry::sql_db",
                        "{}: cannot reuse connection to {info}: {e}",
                        self.label()
                    );
                    let entry = entries.remove(i);
                    entry.conn.close();
                }
            }
        }

        if entries.len() >= self.maxconn {
            // evict the oldest idle connection
            match entries.iter().position(|e| !e.used) {
                Some(pos) => {
                    let entry = entries.remove(pos);
                    entry.conn.close();
                    log::info!(
                        target: "ormregistry::sql_db",
                        "{}: connection to {} closed to make room",
                        self.label(),
                        entry.conn.info
                    );
                }
                None => {
                    log::error!(
                        target: "ormregistry::sql_db",
                        "{}: connection pool is full ({})",
                        self.label(),
                        self.maxconn
                    );
                    return Err(DbError::PoolExhausted(self.maxconn));
                }
            }
        }

        let mut raw = self.driver.connect(info)?;
        if self.readonly {
            raw.set_readonly(true)?;
        }
        let conn = Arc::new(PooledConnection::new(info.clone(), raw));
        entries.push(PoolEntry {
            conn: Arc::clone(&conn),
            used: true,
            last_used: Instant::now(),
        });
        log::debug!(
            target: "ormregistry::sql_db",
            "{}: create new connection to {info} (backend {})",
            self.label(),
            conn.backend_id
        );
        Ok(conn)
    }

    /// Closes idle connections past the timeout, forgets closed ones and
    /// frees leaked ones.
    fn collect_garbage(&self, entries: &mut Vec<PoolEntry>) {
        let label = self.label();
        let idle_timeout = self.idle_timeout;
        entries.retain_mut(|entry| {
            if entry.conn.leaked.swap(false, Ordering::SeqCst) {
                log::info!(
                    target: "ormregistry::sql_db",
                    "{label}: free leaked connection to {}",
                    entry.conn.info
                );
                entry.used = false;
            }
            if entry.conn.is_closed() {
                log::info!(
                    target: "ormregistry::sql_db",
                    "{label}: forget closed connection to {}",
                    entry.conn.info
                );
                return false;
            }
            if !entry.used && entry.last_used.elapsed() > idle_timeout {
                log::info!(
                    target: "ormregistry::sql_db",
                    "{label}: close idle connection to {}",
                    entry.conn.info
                );
                entry.conn.close();
                return false;
            }
            true
        });
    }

    /// Releases a borrowed connection, keeping it for reuse or closing it.
    pub fn give_back(&self, conn: &Arc<PooledConnection>, keep_in_pool: bool) -> Result<()> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.conn, conn))
            .ok_or_else(|| DbError::Pool("this connection does not belong to the pool".into()))?;

        if keep_in_pool {
            // move to the back: the front holds the least recently released
            let mut entry = entries.remove(pos);
            entry.used = false;
            entry.last_used = Instant::now();
            entries.push(entry);
            log::debug!(
                target: "ormregistry::sql_db",
                "{}: give back connection to {}",
                self.label(),
                conn.info
            );
        } else {
            let entry = entries.remove(pos);
            entry.conn.close();
            log::info!(
                target: "ormregistry::sql_db",
                "{}: forgot connection to {}",
                self.label(),
                conn.info
            );
        }
        Ok(())
    }

    /// Force-closes connections, optionally only those matching `info`.
    /// Returns how many were closed.
    pub fn close_all(&self, info: Option<&ConnectionInfo>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| {
            let matching = info.is_none_or(|info| entry.conn.info.dsn_equals(info));
            if matching {
                entry.conn.close();
            }
            !matching
        });
        let closed = before - entries.len();
        log::info!(
            target: "ormregistry::sql_db",
            "{}: closed {closed} connections {}",
            self.label(),
            info.map(|i| format!("to {i}")).unwrap_or_default()
        );
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let entries = self.entries.lock();
        let used = entries.iter().filter(|e| e.used).count();
        PoolStats {
            total_connections: entries.len(),
            available_connections: entries.len() - used,
            active_connections: used,
            max_connections: self.maxconn,
        }
    }

    fn label(&self) -> String {
        format!(
            "ConnectionPool(read/{}; max={})",
            if self.readonly { "only" } else { "write" },
            self.maxconn
        )
    }
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryServer;

    fn pool(maxconn: usize) -> (Arc<MemoryServer>, ConnectionPool) {
        let server = MemoryServer::new();
        server.create_database("one").unwrap();
        server.create_database("two").unwrap();
        let driver: Arc<dyn Driver> = server.clone();
        (server, ConnectionPool::new(driver, maxconn))
    }

    #[test]
    fn test_reuses_idle_connection() {
        let (_server, pool) = pool(2);
        let info = ConnectionInfo::new("one");
        let conn = pool.borrow(&info).unwrap();
        let backend = conn.backend_id();
        pool.give_back(&conn, true).unwrap();

        let again = pool.borrow(&info).unwrap();
        assert_eq!(again.backend_id(), backend);
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[test]
    fn test_exhaustion_is_immediate() {
        let (_server, pool) = pool(1);
        let _conn = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        assert!(matches!(
            pool.borrow(&ConnectionInfo::new("one")),
            Err(DbError::PoolExhausted(1))
        ));
    }

    #[test]
    fn test_evicts_oldest_idle_connection() {
        let (_server, pool) = pool(1);
        let conn = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        pool.give_back(&conn, true).unwrap();

        let other = pool.borrow(&ConnectionInfo::new("two")).unwrap();
        assert_eq!(other.dbname(), "two");
        assert!(conn.is_closed());
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[test]
    fn test_give_back_foreign_connection() {
        let (server, pool) = pool(2);
        let other_pool = ConnectionPool::new(server, 2);
        let conn = other_pool.borrow(&ConnectionInfo::new("one")).unwrap();
        assert!(matches!(pool.give_back(&conn, true), Err(DbError::Pool(_))));
    }

    #[test]
    fn test_close_all_filters_by_database() {
        let (_server, pool) = pool(4);
        let a = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        let b = pool.borrow(&ConnectionInfo::new("two")).unwrap();
        assert_eq!(pool.close_all(Some(&ConnectionInfo::new("one"))), 1);
        assert!(a.is_closed());
        assert!(!b.is_closed());
    }

    #[test]
    fn test_closed_connections_are_forgotten() {
        let (server, pool) = pool(2);
        let conn = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        pool.give_back(&conn, true).unwrap();
        server.terminate_connections("one");

        let fresh = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        assert_ne!(fresh.backend_id(), conn.backend_id());
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[test]
    fn test_leaked_connection_is_freed() {
        let (_server, pool) = pool(1);
        let conn = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        conn.mark_leaked();
        let again = pool.borrow(&ConnectionInfo::new("one")).unwrap();
        assert_eq!(again.backend_id(), conn.backend_id());
    }
}

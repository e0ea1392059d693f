use super::Cursor;
use crate::connection::ConnectionPool;
use crate::connection::config::ConnectionInfo;
use crate::core::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long read-only cursors stay on the read/write pool after the
/// replica failed.
pub const REPLICA_RETRY_TIME: Duration = Duration::from_secs(20 * 60);

/// Handle on one database, from which cursors are opened.
#[derive(Clone)]
pub struct Database {
    info: ConnectionInfo,
    pool: Arc<ConnectionPool>,
    readonly_pool: Option<Arc<ConnectionPool>>,
    /// Last failure to open a cursor on the replica.
    replica_failed: Arc<Mutex<Option<Instant>>>,
    keep_in_pool: bool,
}

impl Database {
    pub fn new(info: ConnectionInfo, pool: Arc<ConnectionPool>) -> Self {
        Self {
            info,
            pool,
            readonly_pool: None,
            replica_failed: Arc::new(Mutex::new(None)),
            keep_in_pool: true,
        }
    }

    /// Pool used by read-only cursors (a replica).
    pub fn with_readonly_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.readonly_pool = Some(pool);
        self
    }

    /// Whether connections are kept for reuse once their cursor closes.
    /// Template databases must not keep idle connections around.
    pub fn keep_in_pool(mut self, keep: bool) -> Self {
        self.keep_in_pool = keep;
        self
    }

    pub fn dbname(&self) -> &str {
        &self.info.database
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// A new cursor. Read-only cursors go to the replica when there is
    /// one; if it cannot serve them, they fall back to a read-only session
    /// on the read/write pool for [`REPLICA_RETRY_TIME`].
    #[track_caller]
    pub fn cursor(&self, readonly: bool) -> Result<Cursor> {
        let Some(replica) = self.readonly_pool.as_ref().filter(|_| readonly) else {
            return Cursor::new(Arc::clone(&self.pool), &self.info, self.keep_in_pool);
        };

        let retry = self
            .replica_failed
            .lock()
            .is_none_or(|failed| failed.elapsed() > REPLICA_RETRY_TIME);
        if retry {
            match Cursor::new(Arc::clone(replica), &self.info, self.keep_in_pool) {
                Ok(cr) => {
                    *self.replica_failed.lock() = None;
                    return Ok(cr);
                }
                Err(e) if e.is_transient() => {
                    *self.replica_failed.lock() = Some(Instant::now());
                    log::warn!(
                        target: "ormregistry::sql_db",
                        "Failed to open a readonly cursor, falling back to read-write cursor for {}s: {e}",
                        REPLICA_RETRY_TIME.as_secs()
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let mut cr = Cursor::new(Arc::clone(&self.pool), &self.info, self.keep_in_pool)?;
        cr.set_readonly_session()?;
        Ok(cr)
    }

    /// Whether read-only cursors currently bypass a failed replica.
    pub fn replica_failed(&self) -> bool {
        self.replica_failed
            .lock()
            .is_some_and(|failed| failed.elapsed() <= REPLICA_RETRY_TIME)
    }

    /// Closes every pooled connection to this database.
    pub fn close_all(&self) -> usize {
        let mut closed = self.pool.close_all(Some(&self.info));
        if let Some(replica) = &self.readonly_pool {
            closed += replica.close_all(Some(&self.info));
        }
        closed
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("info", &self.info).finish()
    }
}

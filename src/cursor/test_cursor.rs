// ============================================================================
// Test cursors
// ============================================================================
//
// Many logical cursors share one physical cursor whose transaction is never
// committed. Each logical cursor emulates its own transaction with a
// savepoint, opened lazily on its first statement:
//
//   commit   -> release the savepoint (rolled back when read-only)
//   rollback -> roll back to the savepoint and release it
//
// Postcommit hooks never run: nothing is really committed.
//
// ============================================================================

use super::{BaseCursor, Hooks, savepoint};
use crate::core::{DbError, Params, Result};
use crate::result::QueryResult;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Re-entrant lock acquired with a timeout, held for the life of a test
/// cursor (possibly released from another thread than the acquiring one).
#[derive(Default)]
pub struct TestLock {
    state: Mutex<LockState>,
    released: Condvar,
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    count: usize,
}

impl TestLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the lock is still held by another thread after
    /// `timeout`.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.count = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    state.count += 1;
                    return true;
                }
                Some(_) => {
                    if self.released.wait_until(&mut state, deadline).timed_out()
                        && state.owner.is_some()
                    {
                        return false;
                    }
                }
            }
        }
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            state.owner = None;
            self.released.notify_one();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

struct StackEntry {
    id: u64,
    readonly: bool,
    has_savepoint: bool,
}

/// State shared by the test cursors of one registry in test mode: the
/// physical cursor, the serialization lock and the stack of open cursors.
pub struct TestSession {
    cursor: Mutex<Box<dyn BaseCursor>>,
    lock: TestLock,
    stack: Mutex<Vec<StackEntry>>,
    lock_timeout: Duration,
    next_id: AtomicU64,
    dbname: String,
}

impl TestSession {
    pub fn new(cursor: Box<dyn BaseCursor>, lock_timeout: Duration) -> Arc<Self> {
        let dbname = cursor.dbname().to_string();
        Arc::new(Self {
            cursor: Mutex::new(cursor),
            lock: TestLock::new(),
            stack: Mutex::new(Vec::new()),
            lock_timeout,
            next_id: AtomicU64::new(1),
            dbname,
        })
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Number of test cursors currently open.
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Runs `f` on the shared physical cursor.
    pub fn with_cursor<T>(&self, f: impl FnOnce(&mut dyn BaseCursor) -> Result<T>) -> Result<T> {
        let mut cursor = self.cursor.lock();
        f(&mut **cursor)
    }

    /// Gives the physical cursor back, e.g. to roll it back and close it
    /// when leaving test mode.
    pub fn into_cursor(self: Arc<Self>) -> Option<Box<dyn BaseCursor>> {
        Arc::into_inner(self).map(|session| session.cursor.into_inner())
    }

    fn set_savepoint_flag(&self, id: u64, open: bool) {
        if let Some(entry) = self.stack.lock().iter_mut().find(|e| e.id == id) {
            entry.has_savepoint = open;
        }
    }
}

/// Cursor emulating an independent transaction on top of a [`TestSession`].
pub struct TestCursor {
    session: Arc<TestSession>,
    id: u64,
    readonly: bool,
    closed: bool,
    savepoint: Option<String>,
    hooks: Hooks,
}

impl TestCursor {
    pub fn new(session: Arc<TestSession>, readonly: bool) -> Result<Self> {
        if !session.lock.acquire(session.lock_timeout) {
            return Err(DbError::LockTimeout(session.lock_timeout));
        }
        let id = session.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut stack = session.stack.lock();
            let illegal = stack
                .last()
                .is_some_and(|last| last.readonly && !readonly && last.has_savepoint);
            if illegal {
                drop(stack);
                session.lock.release();
                return Err(DbError::IllegalNesting(
                    "opening a read/write test cursor from a readonly one".into(),
                ));
            }
            stack.push(StackEntry {
                id,
                readonly,
                has_savepoint: false,
            });
        }
        Ok(Self {
            session,
            id,
            readonly,
            closed: false,
            savepoint: None,
            hooks: Hooks::default(),
        })
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::Interface("Cursor already closed".into()));
        }
        Ok(())
    }

    fn close_savepoint(&mut self, rollback: bool) -> Result<()> {
        if let Some(name) = self.savepoint.take() {
            self.session.set_savepoint_flag(self.id, false);
            self.session
                .with_cursor(|cr| savepoint::close(cr, &name, rollback))?;
        }
        Ok(())
    }
}

impl BaseCursor for TestCursor {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        self.check()?;
        let open = self.savepoint.is_none();
        let (name, result) = self.session.with_cursor(|cr| {
            let name = if open {
                Some(savepoint::open(cr, false)?)
            } else {
                None
            };
            Ok((name, cr.execute(sql, params)))
        })?;
        if let Some(name) = name {
            self.savepoint = Some(name);
            self.session.set_savepoint_flag(self.id, true);
        }
        result
    }

    fn commit(&mut self) -> Result<()> {
        self.check()?;
        self.flush()?;
        // a read-only cursor cannot persist anything
        self.close_savepoint(self.readonly)?;
        self.clear();
        self.hooks.now = None;
        self.hooks.prerollback.clear();
        self.hooks.postrollback.clear();
        self.hooks.postcommit.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.check()?;
        self.clear();
        self.hooks.postcommit.clear();
        self.hooks.prerollback.run()?;
        self.close_savepoint(true)?;
        self.hooks.now = None;
        self.hooks.postrollback.run()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.rollback();
        self.closed = true;

        let tos = self.session.stack.lock().pop();
        match tos {
            Some(entry) if entry.id == self.id => {}
            Some(entry) => log::warn!(
                target: "ormregistry::sql_db",
                "Found different un-closed cursor when trying to close test cursor #{}: #{}",
                self.id,
                entry.id
            ),
            None => log::warn!(
                target: "ormregistry::sql_db",
                "Test cursor #{} closed with an empty cursor stack",
                self.id
            ),
        }
        self.session.lock.release();
        result
    }

    fn closed(&self) -> bool {
        self.closed
    }

    fn readonly(&self) -> bool {
        self.readonly
    }

    fn dbname(&self) -> &str {
        self.session.dbname()
    }

    fn hooks(&mut self) -> &mut Hooks {
        &mut self.hooks
    }
}

impl Drop for TestCursor {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.close()
        {
            log::warn!(target: "ormregistry::sql_db", "closing dropped test cursor: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_reentrant() {
        let lock = TestLock::new();
        assert!(lock.acquire(Duration::from_millis(10)));
        assert!(lock.acquire(Duration::from_millis(10)));
        lock.release();
        assert!(lock.is_locked());
        lock.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_lock_times_out_across_threads() {
        let lock = Arc::new(TestLock::new());
        assert!(lock.acquire(Duration::from_millis(10)));
        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || other.acquire(Duration::from_millis(50)))
            .join()
            .unwrap();
        assert!(!acquired);

        lock.release();
        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || {
            let ok = other.acquire(Duration::from_millis(50));
            other.release();
            ok
        })
        .join()
        .unwrap();
        assert!(acquired);
    }
}

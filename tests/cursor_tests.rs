/// Cursor tests
///
/// Transaction boundaries, hooks, deferred writes and savepoints of real
/// cursors over the in-process server.
/// Run with: cargo test --test cursor_tests
use ormregistry::connection::ConnectionPool;
use ormregistry::cursor::{BaseCursor, Callbacks, Database, scoped, with_savepoint};
use ormregistry::{ConnectionInfo, DbError, MemoryServer, Params, Value};
use parking_lot::Mutex;
use std::sync::Arc;

fn database(maxconn: usize) -> Database {
    let server = MemoryServer::new();
    server.create_database("cursors").unwrap();
    let pool = Arc::new(ConnectionPool::new(server, maxconn));
    let db = Database::new(ConnectionInfo::new("cursors"), pool);
    scoped(db.cursor(false).unwrap(), |cr| {
        cr.execute(
            "CREATE TABLE notes (id SERIAL PRIMARY KEY, body VARCHAR)",
            &Params::None,
        )
    })
    .unwrap();
    db
}

fn count(db: &Database) -> i64 {
    scoped(db.cursor(false).unwrap(), |cr| {
        let result = cr.execute("SELECT count(*) FROM notes", &Params::None)?;
        Ok(result.scalar()?.as_i64().unwrap_or(-1))
    })
    .unwrap()
}

fn insert(cr: &mut impl BaseCursor, body: &str) {
    cr.execute("INSERT INTO notes (body) VALUES (%s)", &Params::from([body]))
        .unwrap();
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, label: &'static str) -> impl FnOnce(&mut Callbacks) -> ormregistry::Result<()> + Send + 'static {
    let log = Arc::clone(log);
    move |_| {
        log.lock().push(label);
        Ok(())
    }
}

#[test]
fn test_commit_publishes_and_close_discards() {
    let db = database(4);

    let mut cr = db.cursor(false).unwrap();
    insert(&mut cr, "kept");
    cr.commit().unwrap();
    insert(&mut cr, "lost");
    cr.close().unwrap();

    assert_eq!(count(&db), 1);
}

#[test]
fn test_uncommitted_rows_are_private() {
    let db = database(4);

    let mut writer = db.cursor(false).unwrap();
    insert(&mut writer, "draft");
    assert_eq!(count(&db), 0);

    writer.commit().unwrap();
    assert_eq!(count(&db), 1);
    writer.close().unwrap();
}

#[test]
fn test_pool_exhaustion_and_reuse() {
    let db = database(2);

    let mut c1 = db.cursor(false).unwrap();
    let mut c2 = db.cursor(false).unwrap();
    assert!(matches!(db.cursor(false), Err(DbError::PoolExhausted(2))));

    c1.close().unwrap();
    let mut c3 = db.cursor(false).unwrap();
    assert_eq!(db.pool().stats().total_connections, 2);

    c2.close().unwrap();
    c3.close().unwrap();
}

#[test]
fn test_readonly_cursor_falls_back_when_replica_is_full() {
    let server = MemoryServer::new();
    server.create_database("cursors").unwrap();
    let replica = Arc::new(ConnectionPool::new(server.clone(), 1).readonly(true));
    let db = Database::new(ConnectionInfo::new("cursors"), Arc::new(ConnectionPool::new(server, 2)))
        .with_readonly_pool(replica);
    scoped(db.cursor(false).unwrap(), |cr| {
        cr.execute(
            "CREATE TABLE notes (id SERIAL PRIMARY KEY, body VARCHAR)",
            &Params::None,
        )
    })
    .unwrap();

    let mut on_replica = db.cursor(true).unwrap();
    assert!(on_replica.readonly());
    assert!(!db.replica_failed());

    let mut fallback = db.cursor(true).unwrap();
    assert!(db.replica_failed());
    assert!(fallback.readonly());
    assert!(
        fallback
            .execute("INSERT INTO notes (body) VALUES ('x')", &Params::None)
            .is_err()
    );
    fallback.close().unwrap();
    on_replica.close().unwrap();

    // the replica stays bypassed for a while
    let mut again = db.cursor(true).unwrap();
    assert!(again.readonly());
    again.close().unwrap();
    assert!(db.replica_failed());

    // the borrowed read/write connection got its session back
    let mut cr = db.cursor(false).unwrap();
    assert!(!cr.readonly());
    insert(&mut cr, "written");
    cr.commit().unwrap();
    cr.close().unwrap();
    assert_eq!(count(&db), 1);
}

#[test]
fn test_closed_cursor_rejects_statements() {
    let db = database(2);
    let mut cr = db.cursor(false).unwrap();
    cr.close().unwrap();
    assert!(cr.closed());
    // idempotent
    cr.close().unwrap();
    assert!(matches!(
        cr.execute("SELECT 1", &Params::None),
        Err(DbError::Interface(_))
    ));
}

#[test]
fn test_commit_hook_ordering() {
    let db = database(2);
    let log: Log = Arc::default();
    let mut cr = db.cursor(false).unwrap();

    cr.hooks().precommit.add(record(&log, "precommit"));
    cr.hooks().postcommit.add(record(&log, "postcommit"));
    cr.hooks().prerollback.add(record(&log, "prerollback"));
    cr.hooks().postrollback.add(record(&log, "postrollback"));
    cr.commit().unwrap();
    assert_eq!(*log.lock(), vec!["precommit", "postcommit"]);

    // the rollback hooks were dropped by the commit
    cr.rollback().unwrap();
    assert_eq!(log.lock().len(), 2);
    cr.close().unwrap();
}

#[test]
fn test_rollback_hook_ordering() {
    let db = database(2);
    let log: Log = Arc::default();
    let mut cr = db.cursor(false).unwrap();

    cr.hooks().precommit.add(record(&log, "precommit"));
    cr.hooks().postcommit.add(record(&log, "postcommit"));
    cr.hooks().prerollback.add(record(&log, "prerollback"));
    cr.hooks().postrollback.add(record(&log, "postrollback"));
    cr.rollback().unwrap();
    assert_eq!(*log.lock(), vec!["prerollback", "postrollback"]);

    // precommit and postcommit are gone too
    cr.commit().unwrap();
    assert_eq!(log.lock().len(), 2);
    cr.close().unwrap();
}

#[test]
fn test_close_without_commit_runs_rollback_hooks() {
    let db = database(2);
    let log: Log = Arc::default();
    let mut cr = db.cursor(false).unwrap();

    insert(&mut cr, "draft");
    cr.hooks().postcommit.add(record(&log, "postcommit"));
    cr.hooks().prerollback.add(record(&log, "prerollback"));
    cr.hooks().postrollback.add(record(&log, "postrollback"));
    cr.close().unwrap();

    assert_eq!(*log.lock(), vec!["prerollback", "postrollback"]);
    assert_eq!(count(&db), 0);

    // closing again is a no-op
    cr.close().unwrap();
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_deferred_writes_run_at_flush() {
    let db = database(4);
    let mut cr = db.cursor(false).unwrap();

    cr.defer("INSERT INTO notes (body) VALUES (%s)", Params::from(["deferred"]));
    assert_eq!(cr.hooks().pending_writes(), 1);
    cr.commit().unwrap();
    assert_eq!(cr.hooks().pending_writes(), 0);
    assert_eq!(count(&db), 1);

    cr.defer("INSERT INTO notes (body) VALUES (%s)", Params::from(["dropped"]));
    cr.rollback().unwrap();
    cr.commit().unwrap();
    assert_eq!(count(&db), 1);
    cr.close().unwrap();
}

#[test]
fn test_now_is_stable_within_a_transaction() {
    let db = database(2);
    let mut cr = db.cursor(false).unwrap();
    let first = cr.now().unwrap();
    let second = cr.now().unwrap();
    assert_eq!(first, second);
    cr.close().unwrap();
}

#[test]
fn test_savepoint_rollback_and_idempotent_close() {
    let db = database(4);
    let mut cr = db.cursor(false).unwrap();
    insert(&mut cr, "before");
    {
        let mut sp = cr.savepoint(false).unwrap();
        insert(sp.cursor(), "inside");
        sp.close(true).unwrap();
        assert!(sp.is_closed());
        sp.close(true).unwrap();
        sp.close(false).unwrap();
    }
    cr.commit().unwrap();
    cr.close().unwrap();

    assert_eq!(count(&db), 1);
}

#[test]
fn test_dropped_savepoint_rolls_back() {
    let db = database(4);
    let mut cr = db.cursor(false).unwrap();
    {
        let mut sp = cr.savepoint(false).unwrap();
        insert(sp.cursor(), "forgotten");
    }
    cr.commit().unwrap();
    cr.close().unwrap();

    assert_eq!(count(&db), 0);
}

#[test]
fn test_with_savepoint_recovers_from_failed_statement() {
    let db = database(4);
    let mut cr = db.cursor(false).unwrap();
    insert(&mut cr, "first");

    let failed = with_savepoint(&mut cr, false, |cr| {
        insert(cr, "undone");
        cr.execute("INSERT INTO missing (x) VALUES (1)", &Params::None)
    });
    assert!(matches!(failed, Err(DbError::Query(_))));

    // the transaction is usable again
    let kept = with_savepoint(&mut cr, false, |cr| {
        insert(cr, "second");
        Ok(())
    });
    assert!(kept.is_ok());
    cr.commit().unwrap();
    cr.close().unwrap();

    let bodies = scoped(db.cursor(true).unwrap(), |cr| {
        cr.execute("SELECT body FROM notes ORDER BY id", &Params::None)?
            .column("body")
    })
    .unwrap();
    assert_eq!(bodies, vec![Value::from("first"), Value::from("second")]);
}

#[test]
fn test_flushing_savepoint_clears_on_rollback() {
    let db = database(4);
    let mut cr = db.cursor(false).unwrap();

    let result: ormregistry::Result<()> = with_savepoint(&mut cr, true, |cr| {
        cr.defer("INSERT INTO notes (body) VALUES (%s)", Params::from(["pending"]));
        Err(DbError::Query("abort".into()))
    });
    assert!(result.is_err());
    assert_eq!(cr.hooks().pending_writes(), 0);
    cr.commit().unwrap();
    cr.close().unwrap();

    assert_eq!(count(&db), 0);
}

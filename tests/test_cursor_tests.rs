/// Test cursor tests
///
/// Logical transactions emulated with savepoints over one physical cursor
/// that is never committed.
/// Run with: cargo test --test test_cursor_tests
use ormregistry::connection::ConnectionPool;
use ormregistry::cursor::{BaseCursor, Database, TestCursor, TestSession, scoped};
use ormregistry::{ConnectionInfo, DbError, MemoryServer, Params, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn database() -> Database {
    let server = MemoryServer::new();
    server.create_database("testing").unwrap();
    let pool = Arc::new(ConnectionPool::new(server, 4));
    let db = Database::new(ConnectionInfo::new("testing"), pool);
    scoped(db.cursor(false).unwrap(), |cr| {
        cr.execute(
            "CREATE TABLE notes (id SERIAL PRIMARY KEY, body VARCHAR)",
            &Params::None,
        )
    })
    .unwrap();
    db
}

fn session(db: &Database, timeout: Duration) -> Arc<TestSession> {
    TestSession::new(Box::new(db.cursor(false).unwrap()), timeout)
}

fn insert(cr: &mut impl BaseCursor, body: &str) {
    cr.execute("INSERT INTO notes (body) VALUES (%s)", &Params::from([body]))
        .unwrap();
}

fn bodies(cr: &mut impl BaseCursor) -> Vec<Value> {
    cr.execute("SELECT body FROM notes ORDER BY id", &Params::None)
        .unwrap()
        .column("body")
        .unwrap()
}

#[test]
fn test_commit_keeps_and_rollback_discards() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));

    let mut cr = TestCursor::new(Arc::clone(&session), false).unwrap();
    insert(&mut cr, "A");
    cr.commit().unwrap();
    insert(&mut cr, "B");
    cr.rollback().unwrap();
    assert_eq!(bodies(&mut cr), vec![Value::from("A")]);
    cr.close().unwrap();
    drop(cr);

    // visible to the next test cursor of the session
    let mut other = TestCursor::new(Arc::clone(&session), true).unwrap();
    assert_eq!(bodies(&mut other), vec![Value::from("A")]);
    other.close().unwrap();
}

#[test]
fn test_nothing_reaches_the_database() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));
    {
        let mut cr = TestCursor::new(Arc::clone(&session), false).unwrap();
        insert(&mut cr, "A");
        cr.commit().unwrap();
        cr.close().unwrap();
    }

    let mut physical = session.into_cursor().unwrap();
    physical.rollback().unwrap();
    physical.close().unwrap();

    let rows = scoped(db.cursor(true).unwrap(), |cr| Ok(bodies(cr))).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_readonly_commit_discards_writes() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));

    let mut reader = TestCursor::new(Arc::clone(&session), true).unwrap();
    insert(&mut reader, "sneaky");
    reader.commit().unwrap();
    assert!(bodies(&mut reader).is_empty());
    reader.close().unwrap();
}

#[test]
fn test_postcommit_never_runs() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut cr = TestCursor::new(Arc::clone(&session), false).unwrap();
    let flag = Arc::clone(&ran);
    cr.hooks().postcommit.add(move |_| {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    });
    insert(&mut cr, "A");
    cr.commit().unwrap();
    cr.close().unwrap();
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn test_nested_cursors_and_depth() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));

    let mut outer = TestCursor::new(Arc::clone(&session), false).unwrap();
    insert(&mut outer, "outer");
    {
        let mut inner = TestCursor::new(Arc::clone(&session), false).unwrap();
        assert_eq!(session.depth(), 2);
        insert(&mut inner, "inner");
        inner.commit().unwrap();
        inner.close().unwrap();
    }
    assert_eq!(session.depth(), 1);
    outer.commit().unwrap();
    assert_eq!(
        bodies(&mut outer),
        vec![Value::from("outer"), Value::from("inner")]
    );
    outer.close().unwrap();
    assert_eq!(session.depth(), 0);
}

#[test]
fn test_write_cursor_inside_used_readonly_cursor_is_illegal() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));

    let mut reader = TestCursor::new(Arc::clone(&session), true).unwrap();
    // a readonly cursor that did nothing yet does not constrain nesting
    let mut early = TestCursor::new(Arc::clone(&session), false).unwrap();
    early.close().unwrap();
    drop(early);

    bodies(&mut reader);
    assert!(matches!(
        TestCursor::new(Arc::clone(&session), false),
        Err(DbError::IllegalNesting(_))
    ));
    // a readonly one is fine
    let mut nested = TestCursor::new(Arc::clone(&session), true).unwrap();
    nested.close().unwrap();
    reader.close().unwrap();
}

#[test]
fn test_other_threads_wait_for_the_lock() {
    let db = database();
    let session = session(&db, Duration::from_millis(50));

    let mut holder = TestCursor::new(Arc::clone(&session), false).unwrap();
    let contender = Arc::clone(&session);
    let timed_out = thread::spawn(move || {
        matches!(TestCursor::new(contender, false), Err(DbError::LockTimeout(_)))
    })
    .join()
    .unwrap();
    assert!(timed_out);

    holder.close().unwrap();
    drop(holder);
    let contender = Arc::clone(&session);
    let acquired = thread::spawn(move || {
        let mut cr = TestCursor::new(contender, false).unwrap();
        cr.close().is_ok()
    })
    .join()
    .unwrap();
    assert!(acquired);
}

#[test]
fn test_cursor_closed_on_another_thread_frees_the_lock() {
    let db = database();
    let session = session(&db, Duration::from_millis(200));

    let cr = TestCursor::new(Arc::clone(&session), false).unwrap();
    let closed = thread::spawn(move || {
        let mut cr = cr;
        cr.close().is_ok()
    })
    .join()
    .unwrap();
    assert!(closed);

    let contender = Arc::clone(&session);
    let acquired = thread::spawn(move || TestCursor::new(contender, false).map(|mut cr| cr.close()))
        .join()
        .unwrap();
    assert!(matches!(acquired, Ok(Ok(()))));
    assert_eq!(session.depth(), 0);
}

#[test]
fn test_closed_test_cursor() {
    let db = database();
    let session = session(&db, Duration::from_secs(2));
    let mut cr = TestCursor::new(session, false).unwrap();
    cr.close().unwrap();
    cr.close().unwrap();
    assert!(cr.closed());
    assert!(matches!(cr.commit(), Err(DbError::Interface(_))));
}

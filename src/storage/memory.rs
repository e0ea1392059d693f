use crate::core::{DbError, Result};
use crate::transaction::TransactionManager;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One database of a [`MemoryServer`].
pub struct MemoryDatabase {
    name: String,
    transactions: TransactionManager,
    /// Sequences are not transactional: values handed out stay consumed.
    sequences: Mutex<HashMap<String, i64>>,
    next_row_id: AtomicU64,
    /// Bumped when the server terminates the connections of this database.
    epoch: AtomicU64,
    statements: AtomicU64,
    ddl_statements: AtomicU64,
    extensions: RwLock<BTreeSet<String>>,
}

impl MemoryDatabase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transactions: TransactionManager::new(),
            sequences: Mutex::new(HashMap::new()),
            next_row_id: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            statements: AtomicU64::new(0),
            ddl_statements: AtomicU64::new(0),
            extensions: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn nextval(&self, sequence: &str) -> i64 {
        let mut sequences = self.sequences.lock();
        let value = sequences.entry(sequence.to_string()).or_insert(0);
        *value += 1;
        *value
    }

    pub fn next_row_id(&self) -> u64 {
        self.next_row_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn record_statement(&self, ddl: bool) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        if ddl {
            self.ddl_statements.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Statements executed against this database, all connections included.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// DDL statements executed (successfully or not).
    pub fn ddl_count(&self) -> u64 {
        self.ddl_statements.load(Ordering::Relaxed)
    }

    pub fn extensions(&self) -> Vec<String> {
        self.extensions.read().iter().cloned().collect()
    }
}

/// An in-process database server hosting named databases.
///
/// Several connection pools (standing for several OS processes) may share
/// one server; they only see each other's committed work.
#[derive(Default)]
pub struct MemoryServer {
    databases: RwLock<HashMap<String, Arc<MemoryDatabase>>>,
    next_backend_id: AtomicU64,
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_database(&self, name: &str) -> Result<Arc<MemoryDatabase>> {
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(DbError::query(format!("database \"{name}\" already exists")));
        }
        let db = Arc::new(MemoryDatabase::new(name));
        databases.insert(name.to_string(), Arc::clone(&db));
        log::info!(target: "ormregistry::storage", "created database {name}");
        Ok(db)
    }

    pub fn drop_database(&self, name: &str) -> Result<()> {
        let removed = self.databases.write().remove(name);
        match removed {
            Some(db) => {
                db.epoch.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(DbError::query(format!("database \"{name}\" does not exist"))),
        }
    }

    pub fn database(&self, name: &str) -> Option<Arc<MemoryDatabase>> {
        self.databases.read().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Breaks every open connection to `name`, the way `pg_terminate_backend` does.
    pub fn terminate_connections(&self, name: &str) {
        if let Some(db) = self.database(name) {
            db.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn enable_extension(&self, db: &str, extension: &str) -> Result<()> {
        let database = self
            .database(db)
            .ok_or_else(|| DbError::Connection(format!("database \"{db}\" does not exist")))?;
        database.extensions.write().insert(extension.to_string());
        Ok(())
    }

    pub(crate) fn next_backend_id(&self) -> u64 {
        self.next_backend_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_monotonic_per_name() {
        let server = MemoryServer::new();
        let db = server.create_database("test").unwrap();
        assert_eq!(db.nextval("a_id_seq"), 1);
        assert_eq!(db.nextval("a_id_seq"), 2);
        assert_eq!(db.nextval("b_id_seq"), 1);
    }

    #[test]
    fn test_database_lifecycle() {
        let server = MemoryServer::new();
        server.create_database("one").unwrap();
        assert!(server.create_database("one").is_err());
        assert_eq!(server.database_names(), vec!["one".to_string()]);

        let db = server.database("one").unwrap();
        let epoch = db.epoch();
        server.terminate_connections("one");
        assert_eq!(db.epoch(), epoch + 1);

        server.drop_database("one").unwrap();
        assert!(server.database("one").is_none());
    }
}

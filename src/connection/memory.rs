// ============================================================================
// In-process driver
// ============================================================================
//
// `MemoryServer` acts as a database server: each connection owns at most one
// open transaction over one `MemoryDatabase`. A statement failing inside a
// transaction restores the state as of the statement start and puts the
// transaction in the failed state, where only ROLLBACK [TO SAVEPOINT] is
// accepted.
//
// ============================================================================

use super::config::ConnectionInfo;
use super::{Driver, RawConnection};
use crate::core::{DbError, Params, Result, Value};
use crate::executor::{ExecutionContext, ExecutorPipeline};
use crate::parser::SqlParserAdapter;
use crate::parser::ast::Statement;
use crate::result::QueryResult;
use crate::storage::{MemoryDatabase, MemoryServer};
use crate::transaction::{Transaction, TransactionStatus};
use std::sync::Arc;

impl Driver for MemoryServer {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RawConnection>> {
        let db = self.database(&info.database).ok_or_else(|| {
            DbError::Connection(format!(
                "FATAL: database \"{}\" does not exist",
                info.database
            ))
        })?;
        let backend_id = self.next_backend_id();
        log::debug!(target: "ormregistry::sql_db", "connection to {info} opened (backend {backend_id})");
        Ok(Box::new(MemoryConnection::new(db, backend_id)))
    }
}

pub struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    epoch: u64,
    backend_id: u64,
    tx: Option<Transaction>,
    readonly: bool,
    closed: bool,
    parser: SqlParserAdapter,
    pipeline: ExecutorPipeline,
}

impl MemoryConnection {
    pub fn new(db: Arc<MemoryDatabase>, backend_id: u64) -> Self {
        let epoch = db.epoch();
        Self {
            db,
            epoch,
            backend_id,
            tx: None,
            readonly: false,
            closed: false,
            parser: SqlParserAdapter::new(),
            pipeline: ExecutorPipeline::standard(),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn check_link(&mut self) -> Result<()> {
        if self.closed {
            return Err(DbError::Interface("connection already closed".into()));
        }
        if self.db.epoch() != self.epoch {
            self.closed = true;
            self.tx = None;
            return Err(DbError::Connection(
                "server closed the connection unexpectedly".into(),
            ));
        }
        Ok(())
    }

    fn transaction(&mut self) -> &mut Transaction {
        let (db, readonly) = (&self.db, self.readonly);
        self.tx
            .get_or_insert_with(|| db.transactions().begin(readonly))
    }

    fn execute_statement(&mut self, stmt: &Statement, values: &[Value]) -> Result<QueryResult> {
        match stmt {
            Statement::Begin => {
                self.transaction();
                Ok(QueryResult::empty())
            }
            Statement::Commit => self.commit().map(|_| QueryResult::empty()),
            Statement::Rollback => self.rollback().map(|_| QueryResult::empty()),
            Statement::Savepoint(name) => self.control(|tx| tx.savepoint(name)),
            Statement::ReleaseSavepoint(name) => self.control(|tx| tx.release(name)),
            Statement::RollbackToSavepoint(name) => self.control(|tx| tx.rollback_to(name)),
            Statement::SetReadOnly(readonly) => {
                let readonly = *readonly;
                let db = Arc::clone(&self.db);
                let tx = self.transaction();
                if tx.is_dirty() {
                    tx.mark_failed();
                    return Err(DbError::query(
                        "SET TRANSACTION ISOLATION LEVEL must be called before any query",
                    ));
                }
                *tx = db.transactions().begin(readonly);
                Ok(QueryResult::empty())
            }
            _ => self.run(stmt, values),
        }
    }

    /// Savepoint statements; failures abort the transaction like any other.
    fn control(&mut self, op: impl FnOnce(&mut Transaction) -> Result<()>) -> Result<QueryResult> {
        let tx = self.transaction();
        match op(tx) {
            Ok(()) => Ok(QueryResult::empty()),
            Err(e) => {
                tx.mark_failed();
                Err(e)
            }
        }
    }

    fn run(&mut self, stmt: &Statement, values: &[Value]) -> Result<QueryResult> {
        let (db, readonly) = (&self.db, self.readonly);
        let tx = self
            .tx
            .get_or_insert_with(|| db.transactions().begin(readonly));
        tx.check_active()?;
        db.record_statement(stmt.is_ddl());

        let mark = tx.mark();
        let mut ctx = ExecutionContext::new(tx, db, values);
        let outcome = self.pipeline.execute(stmt, &mut ctx);
        if outcome.is_err() {
            tx.restore(mark);
            tx.mark_failed();
        }
        outcome
    }
}

impl RawConnection for MemoryConnection {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        self.check_link()?;
        let (sql, values) = params.bind(sql)?;

        let statements = match self.parser.parse(&sql) {
            Ok(statements) => statements,
            Err(e) => {
                let tx = self.transaction();
                tx.mark_failed();
                return Err(e);
            }
        };

        let mut result = QueryResult::empty();
        for stmt in &statements {
            result = self.execute_statement(stmt, &values)?;
        }
        Ok(result)
    }

    fn commit(&mut self) -> Result<()> {
        self.check_link()?;
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        if tx.status() == TransactionStatus::Failed {
            log::warn!(
                target: "ormregistry::sql_db",
                "backend {}: COMMIT of an aborted transaction rolled back",
                self.backend_id
            );
            return Ok(());
        }
        self.db.transactions().commit(tx)
    }

    fn rollback(&mut self) -> Result<()> {
        self.check_link()?;
        self.tx = None;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.check_link()?;
        self.tx = None;
        Ok(())
    }

    fn set_readonly(&mut self, readonly: bool) -> Result<()> {
        self.check_link()?;
        self.readonly = readonly;
        Ok(())
    }

    fn close(&mut self) {
        self.tx = None;
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed || self.db.epoch() != self.epoch
    }

    fn backend_id(&self) -> u64 {
        self.backend_id
    }
}

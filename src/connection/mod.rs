pub mod config;
pub mod memory;
pub mod pool;

use crate::core::{Params, Result};
use crate::result::QueryResult;
use config::ConnectionInfo;

pub use memory::MemoryConnection;
pub use pool::{ConnectionPool, PoolStats, PooledConnection};

/// A physical session with a database server.
///
/// A transaction is implicitly open from the first statement until
/// `commit`/`rollback`, the way a DB-API connection behaves outside of
/// autocommit mode.
pub trait RawConnection: Send {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<QueryResult>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Brings the session back to a clean state before it is reused.
    fn reset(&mut self) -> Result<()>;

    /// Session default for new transactions.
    fn set_readonly(&mut self, readonly: bool) -> Result<()>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// Server-side identifier of the session (`pg_backend_pid`).
    fn backend_id(&self) -> u64;
}

/// Opens physical connections.
pub trait Driver: Send + Sync {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RawConnection>>;
}

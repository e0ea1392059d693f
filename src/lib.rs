// ============================================================================
// ormregistry Library
// ============================================================================
//
// Per-database model registries on top of transactional cursors:
//
//   connection  -> drivers and the shared connection pool
//   cursor      -> cursors, savepoints, hooks and test cursors
//   cache       -> LRU partitions and memoized ORM methods
//   registry    -> model composition, table reconciliation, signaling
//
// `storage`, `transaction` and `executor` implement the in-process SQL
// server the `MemoryServer` driver talks to.
//
// ============================================================================

pub mod cache;
pub mod config;
pub mod connection;
pub mod core;
pub mod cursor;
pub mod prelude;
pub mod registry;
pub mod result;
pub mod storage;
pub mod transaction;
mod executor;
mod parser;

// Re-export main types for convenience
pub use core::{DataType, DbError, Params, Result, Value};
pub use result::QueryResult;

pub use cache::{CacheLayout, Caches, OrmCache};
pub use config::RegistryConfig;
pub use connection::{
    ConnectionPool, Driver, PoolStats,
    config::ConnectionInfo,
};
pub use cursor::{BaseCursor, Cursor, Database, Savepoint, TestCursor, TestSession, with_savepoint};
pub use registry::{
    Changes, Field, FieldId, LoadOptions, ModelDef, Module, ModuleLoader, Registries, Registry,
    StaticLoader,
};
pub use storage::MemoryServer;

/// Builds a registries service over an in-process server holding `dbnames`.
///
/// # Examples
///
/// ```
/// use ormregistry::{Field, ModelDef, Module, StaticLoader, RegistryConfig};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let loader = Arc::new(StaticLoader::new(vec![
///     Module::new("base").model(ModelDef::new("res.partner").field(Field::char("name"))),
/// ]));
/// let registries = ormregistry::in_memory(&["demo"], RegistryConfig::new(), loader)?;
///
/// let registry = registries.get("demo")?;
/// assert!(registry.contains("res.partner"));
/// # Ok(())
/// # }
/// ```
pub fn in_memory(
    dbnames: &[&str],
    config: RegistryConfig,
    loader: std::sync::Arc<dyn ModuleLoader>,
) -> Result<Registries> {
    let server = MemoryServer::new();
    for dbname in dbnames {
        server.create_database(dbname)?;
    }
    Registries::new(config, server, ConnectionInfo::new("postgres"), loader)
}

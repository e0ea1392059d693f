//! The types most applications need, in one import.
//!
//! ```
//! use ormregistry::prelude::*;
//! ```

pub use crate::cache::{CacheLayout, OrmCache};
pub use crate::config::RegistryConfig;
pub use crate::connection::config::ConnectionInfo;
pub use crate::core::{DbError, Params, Result, Value};
pub use crate::cursor::{BaseCursor, Database, scoped, with_savepoint};
pub use crate::params;
pub use crate::registry::{
    Changes, Field, FieldId, FieldType, IndexKind, LoadOptions, ModelDef, ModelKind, Module,
    ModuleLoader, ModuleState, Registries, Registry, Signal, StaticLoader,
};
pub use crate::storage::MemoryServer;

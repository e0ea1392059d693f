pub mod catalog;
pub mod introspection;
pub mod memory;
pub mod state;
pub mod table;

pub use catalog::{ConstraintDef, ConstraintKind, IndexDef, TableSchema};
pub use memory::{MemoryDatabase, MemoryServer};
pub use state::DatabaseState;
pub use table::Table;

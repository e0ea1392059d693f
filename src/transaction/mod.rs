// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Snapshot isolation over persistent maps:
// - Command Pattern: every effect is a replayable Change
// - Copy-on-Write: working copies and savepoint frames are O(1) clones
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::TransactionManager;
pub use state::{Transaction, TransactionStatus};

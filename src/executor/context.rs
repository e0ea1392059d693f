use super::eval::Evaluator;
use crate::core::Value;
use crate::storage::{DatabaseState, MemoryDatabase};
use crate::transaction::Transaction;

/// Everything a statement executor can touch: the open transaction, the
/// database it runs against and the bound parameter values.
pub struct ExecutionContext<'a> {
    pub tx: &'a mut Transaction,
    pub db: &'a MemoryDatabase,
    pub params: &'a [Value],
}

impl<'a> ExecutionContext<'a> {
    pub fn new(tx: &'a mut Transaction, db: &'a MemoryDatabase, params: &'a [Value]) -> Self {
        Self { tx, db, params }
    }

    /// Evaluator reading `state`, usually a snapshot of the working copy taken
    /// before the statement started writing.
    pub fn evaluator<'s>(&self, state: &'s DatabaseState) -> Evaluator<'s>
    where
        'a: 's,
    {
        Evaluator::new(state, self.db, self.params, self.tx.started_at())
    }
}

use super::ExecutionContext;
use super::ddl::{
    AlterTableExecutor, CreateIndexExecutor, CreateTableExecutor, DropIndexExecutor,
    DropTableExecutor,
};
use super::dml::{DeleteExecutor, InsertExecutor, UpdateExecutor};
use super::query::QueryExecutor;
use crate::core::{DbError, Result};
use crate::parser::ast::Statement;
use crate::result::QueryResult;

pub trait Executor: Send + Sync {
    /// Executor name, for logs
    fn name(&self) -> &'static str;

    fn can_handle(&self, stmt: &Statement) -> bool;
    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult>;
}

pub struct ExecutorPipeline {
    executors: Vec<Box<dyn Executor>>,
}

impl ExecutorPipeline {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    /// Pipeline handling every data and schema statement.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(CreateTableExecutor));
        pipeline.register(Box::new(DropTableExecutor));
        pipeline.register(Box::new(AlterTableExecutor));
        pipeline.register(Box::new(CreateIndexExecutor));
        pipeline.register(Box::new(DropIndexExecutor));
        pipeline.register(Box::new(InsertExecutor));
        pipeline.register(Box::new(UpdateExecutor));
        pipeline.register(Box::new(DeleteExecutor));
        pipeline.register(Box::new(QueryExecutor));
        pipeline
    }

    pub fn register(&mut self, executor: Box<dyn Executor>) {
        self.executors.push(executor);
    }

    pub fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        for executor in &self.executors {
            if executor.can_handle(stmt) {
                log::trace!(target: "ormregistry::sql_db", "dispatching to {}", executor.name());
                return executor.execute(stmt, ctx);
            }
        }

        Err(DbError::Query(format!(
            "no executor found for statement {stmt:?}"
        )))
    }
}

impl Default for ExecutorPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

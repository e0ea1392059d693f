mod context;
mod ddl;
mod dml;
mod eval;
mod executor;
mod integrity;
mod query;

pub use context::ExecutionContext;
pub use eval::{Evaluator, RowScope};
pub use executor::{Executor, ExecutorPipeline};

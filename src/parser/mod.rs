pub mod adapter;
pub mod ast;
pub mod control;

pub use adapter::SqlParserAdapter;

pub mod error;
pub mod params;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use params::Params;
pub use types::{Column, ColumnDefault, Row};
pub use value::{DataType, Value};

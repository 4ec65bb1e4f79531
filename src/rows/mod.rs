pub mod format;
pub mod store;
pub mod types;

pub use format::{CsvRowFile, JsonRowFile, RowFile, RowFormat};
pub use store::{validate, value_or_null, RowStore};
pub use types::{Row, Values};

pub mod category;
pub mod store;
pub mod types;
pub mod write;

pub use category::{Category, CategoryStore};
pub use store::{SchemaEdit, SchemaStore};
pub use types::{encode_cell, is_reserved, ColumnDef, ColumnType, CATEGORY_FIELD, ID_COLUMN};
pub use write::{read_columns, write_columns};

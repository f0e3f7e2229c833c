mod error;
mod page;
mod page_file;
mod record;
mod schema;
mod value;

pub use error::{RecordError, RecordResult};
pub use page::{PageHeader, PageId};
pub use page_file::{DEFINITION_EXTENSION, PageFile, RECORD_EXTENSION};
pub use record::{PageRow, RowCursor, RowId, RowSlot};
pub use schema::{ColumnConstraint, ColumnScheme, TableScheme};
pub use value::{SqlValueType, Value};

pub mod catalog;
pub mod config;
pub mod database;
pub mod file;
pub mod insert;
pub mod record;
pub mod scan;

pub use catalog::{CatalogError, SchemaCatalog};
pub use config::{ConfigError, EngineConfig};
pub use database::{Database, DatabaseError, DatabaseResult, ErrorKind};
pub use file::{AccessMode, FileError, FileHandlePool, MAX_OPEN_FILES, MAX_PAGE_SIZE};
pub use insert::{
    InsertError, InsertOption, InsertOutcome, PageAllocator, RowUpdate, SequentialPageAllocator,
};
pub use record::{
    ColumnConstraint, ColumnScheme, PageFile, PageHeader, PageRow, RecordError, RecordResult,
    SqlValueType, TableScheme, Value,
};
pub use scan::{ComparisonOperator, ConditionGroup, LogicalOperator, ScanError, ScanQuery};

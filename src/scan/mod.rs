mod condition;
mod executor;
mod planner;

use thiserror::Error;

use crate::file::FileError;
use crate::record::RecordError;

pub use condition::{
    ComparisonOperator, Condition, ConditionGroup, LogicalOperator, Operand, PreparedCondition,
};
pub use executor::{ScanExecutor, merge_results};
pub use planner::{PageWorkItem, RowCap, ScanPlan, ScanPlanner, ScanQuery};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Column {0} not found")]
    ColumnNotFound(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Operand '{operand}' cannot be compared with {operator}")]
    InvalidOperandType {
        operand: String,
        operator: ComparisonOperator,
    },
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Record(RecordError::Io(err))
    }
}

pub type ScanResult<T> = Result<T, ScanError>;

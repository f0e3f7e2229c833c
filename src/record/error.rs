use crate::file::FileError;
use std::io;
use thiserror::Error;

use super::value::SqlValueType;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported value type {value_type} for {operation}")]
    UnsupportedValueType {
        value_type: SqlValueType,
        operation: &'static str,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Row {row_id} not found in page")]
    RowNotFound { row_id: u32 },

    #[error("Corrupted page data: {0}")]
    Corrupted(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("NULL value for NOT NULL column: {0}")]
    NullConstraintViolation(String),
}

impl RecordError {
    pub(crate) fn unsupported(value_type: SqlValueType, operation: &'static str) -> Self {
        RecordError::UnsupportedValueType {
            value_type,
            operation,
        }
    }
}

pub type RecordResult<T> = Result<T, RecordError>;

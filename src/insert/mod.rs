mod allocator;

use std::io::{Seek, SeekFrom};
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::file::{FileError, FileHandlePool};
use crate::record::{
    ColumnConstraint, ColumnScheme, PageFile, PageHeader, PageId, PageRow, RecordError, RowCursor,
    RowId, SqlValueType, TableScheme, Value,
};
use crate::scan::ScanError;

pub use allocator::{PageAllocator, SequentialPageAllocator};

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Column {column} doesn't exist in table {table}")]
    ColumnDoesntExist { table: String, column: String },

    #[error("{columns} columns given for {values} values")]
    ValueCountMismatch { columns: usize, values: usize },

    #[error("Constraint violation on column {column}: {reason}")]
    ConstraintViolation { column: String, reason: String },

    #[error("Row of {size} bytes can never fit a page of {max_page_size} bytes")]
    RowTooLarge { size: u64, max_page_size: u64 },

    #[error("No page available for table {table}: {reason}")]
    NoPageAvailable { table: String, reason: String },
}

impl From<std::io::Error> for InsertError {
    fn from(err: std::io::Error) -> Self {
        InsertError::Record(RecordError::Io(err))
    }
}

pub type InsertResult<T> = Result<T, InsertError>;

/// Where a new row ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOption {
    /// Overwrote a freed slot
    Reused,
    /// Appended to an existing page
    Appended,
    /// Appended to a page allocated for this row
    NewPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub page: PageId,
    pub row_id: RowId,
    pub option: InsertOption,
}

/// A row converted from literals, not yet placed.
///
/// `payload_estimate` is the encoded size of the non-null values, computed
/// from the literal text before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub values: Vec<Option<Value>>,
    payload_estimate: u64,
}

impl PendingRow {
    /// Convert `(column, literal)` pairs into a full row in column order.
    /// Columns not named stay NULL; a `None` literal is NULL.
    pub fn from_literals(
        scheme: &TableScheme,
        columns: &[&str],
        literals: &[Option<&str>],
    ) -> InsertResult<Self> {
        let mut values = vec![None; scheme.column_count()];
        let mut payload_estimate = 0u64;

        for assignment in resolve_literals(scheme, columns, literals)? {
            payload_estimate += assignment.size_estimate;
            values[assignment.column] = assignment.value;
        }

        Ok(Self {
            values,
            payload_estimate,
        })
    }

    /// Wrap already typed values, e.g. a row moved out of a slot it outgrew
    pub fn from_values(scheme: &TableScheme, values: Vec<Option<Value>>) -> InsertResult<Self> {
        scheme.validate_row(&values)?;
        let mut payload_estimate = 0u64;
        for (value, col) in values.iter().zip(scheme.columns()) {
            if let Some(value) = value {
                payload_estimate += value.encoded_len(col.value_type)? as u64;
            }
        }
        Ok(Self {
            values,
            payload_estimate,
        })
    }

    /// Bytes the row adds to a page when appended:
    /// length field, row id, null bitmap and payload
    pub fn estimated_size(&self) -> u64 {
        8 + self.values.len() as u64 + self.payload_estimate
    }

    /// Whether enforcing constraints needs the table's existing rows
    pub fn needs_existing_rows(&self, scheme: &TableScheme) -> bool {
        scheme.columns().iter().zip(&self.values).any(|(col, value)| {
            (value.is_some() && col.is_unique()) || (value.is_none() && auto_increments(col))
        })
    }

    /// Fill auto-increment columns, then check NOT NULL, PRIMARY KEY and
    /// UNIQUE against `existing` live rows
    pub fn apply_constraints(&mut self, scheme: &TableScheme, existing: &[PageRow]) -> InsertResult<()> {
        for (idx, col) in scheme.columns().iter().enumerate() {
            if self.values[idx].is_none() && auto_increments(col) {
                let next = existing
                    .iter()
                    .filter_map(|row| row.get(idx).and_then(Value::as_i64))
                    .max()
                    .map_or(1, |max| max + 1);
                let next = i32::try_from(next).map_err(|_| InsertError::ConstraintViolation {
                    column: col.name.clone(),
                    reason: "auto increment overflow".to_string(),
                })?;
                let value = Value::Integer(next);
                self.payload_estimate += value.encoded_len(col.value_type)? as u64;
                self.values[idx] = Some(value);
            }
        }

        for (idx, col) in scheme.columns().iter().enumerate() {
            match &self.values[idx] {
                None if !col.is_nullable() => {
                    return Err(InsertError::ConstraintViolation {
                        column: col.name.clone(),
                        reason: "NULL not allowed".to_string(),
                    });
                }
                Some(value) if col.is_unique() => {
                    if existing.iter().any(|row| row.get(idx) == Some(value)) {
                        return Err(InsertError::ConstraintViolation {
                            column: col.name.clone(),
                            reason: format!("duplicate value {}", value),
                        });
                    }
                }
                _ => {}
            }
        }

        scheme.validate_row(&self.values)?;
        Ok(())
    }
}

/// One resolved `column = literal` pair
struct Assignment {
    column: usize,
    value: Option<Value>,
    size_estimate: u64,
}

fn resolve_literals(
    scheme: &TableScheme,
    columns: &[&str],
    literals: &[Option<&str>],
) -> InsertResult<Vec<Assignment>> {
    if columns.len() != literals.len() {
        return Err(InsertError::ValueCountMismatch {
            columns: columns.len(),
            values: literals.len(),
        });
    }

    let mut assigned = vec![false; scheme.column_count()];
    let mut resolved = Vec::with_capacity(columns.len());
    for (name, literal) in columns.iter().zip(literals) {
        let idx = scheme
            .find_column(name)
            .ok_or_else(|| InsertError::ColumnDoesntExist {
                table: scheme.table_name().to_string(),
                column: name.to_string(),
            })?;
        if assigned[idx] {
            return Err(InsertError::ConstraintViolation {
                column: name.to_string(),
                reason: "column given more than once".to_string(),
            });
        }
        assigned[idx] = true;

        let value_type = scheme.columns()[idx].value_type;
        let (value, size_estimate) = match literal {
            Some(text) => (
                Some(Value::parse(text, value_type)?),
                Value::estimate_size(text, value_type)? as u64,
            ),
            None => (None, 0),
        };
        resolved.push(Assignment {
            column: idx,
            value,
            size_estimate,
        });
    }
    Ok(resolved)
}

/// `SET column = literal, ...` of an update, typed against a scheme
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    assignments: Vec<(usize, Option<Value>)>,
}

impl RowUpdate {
    pub fn from_literals(
        scheme: &TableScheme,
        columns: &[&str],
        literals: &[Option<&str>],
    ) -> InsertResult<Self> {
        let assignments = resolve_literals(scheme, columns, literals)?
            .into_iter()
            .map(|a| (a.column, a.value))
            .collect();
        Ok(Self { assignments })
    }

    /// Copy of `row` with every assignment applied; the row id is kept
    pub fn apply(&self, row: &PageRow) -> PageRow {
        let mut updated = row.clone();
        for (idx, value) in &self.assignments {
            if let Some(slot) = updated.values.get_mut(*idx) {
                *slot = value.clone();
            }
        }
        updated
    }

    /// Check the rows at `changed` against NOT NULL, PRIMARY KEY and UNIQUE,
    /// where `table` is every live row as it stands after the update
    pub fn check(&self, scheme: &TableScheme, table: &[PageRow], changed: &[usize]) -> InsertResult<()> {
        for &pos in changed {
            let row = &table[pos];
            scheme.validate_row(&row.values)?;
            for (idx, col) in scheme.columns().iter().enumerate() {
                match &row.values[idx] {
                    None if !col.is_nullable() => {
                        return Err(InsertError::ConstraintViolation {
                            column: col.name.clone(),
                            reason: "NULL not allowed".to_string(),
                        });
                    }
                    Some(value) if col.is_unique() => {
                        let duplicate = table
                            .iter()
                            .enumerate()
                            .any(|(other, r)| other != pos && r.get(idx) == Some(value));
                        if duplicate {
                            return Err(InsertError::ConstraintViolation {
                                column: col.name.clone(),
                                reason: format!("duplicate value {}", value),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn auto_increments(col: &ColumnScheme) -> bool {
    col.has_constraint(ColumnConstraint::AutoIncrement) && col.value_type == SqlValueType::Integer
}

/// Chooses where a row goes: a freed slot, the end of a page with room, or a
/// freshly allocated page
pub struct InsertionPlanner<'a> {
    pool: &'a FileHandlePool,
    scheme: &'a TableScheme,
    max_page_size: u64,
}

impl<'a> InsertionPlanner<'a> {
    pub fn new(pool: &'a FileHandlePool, scheme: &'a TableScheme, max_page_size: u64) -> Self {
        Self {
            pool,
            scheme,
            max_page_size,
        }
    }

    /// Place `row` on the first page that takes it, in page order. When none
    /// does, a page is requested from `allocator`; without one the insert
    /// fails with `NoPageAvailable`.
    pub fn insert(
        &self,
        pages: &[PageFile],
        row: &PendingRow,
        allocator: Option<&dyn PageAllocator>,
        table_dir: &Path,
    ) -> InsertResult<InsertOutcome> {
        let table = self.scheme.table_name();
        self.check_fits(row)?;

        for page in pages {
            if let Some((row_id, option)) = self.try_page(page, row)? {
                return Ok(self.placed(page, row_id, option));
            }
        }

        let Some(allocator) = allocator else {
            return Err(InsertError::NoPageAvailable {
                table: table.to_string(),
                reason: "page allocation is disabled".to_string(),
            });
        };

        let page = allocator.allocate(table, table_dir, pages)?;
        match self.try_page(&page, row)? {
            Some((row_id, _)) => Ok(self.placed(&page, row_id, InsertOption::NewPage)),
            None => Err(InsertError::NoPageAvailable {
                table: table.to_string(),
                reason: format!("allocated page {} has no room", page.sequence()),
            }),
        }
    }

    /// Fail with `RowTooLarge` when `row` exceeds even an empty page
    pub fn check_fits(&self, row: &PendingRow) -> InsertResult<()> {
        let size = row.estimated_size();
        if PageHeader::new(0).encoded_len() as u64 + size > self.max_page_size {
            return Err(InsertError::RowTooLarge {
                size,
                max_page_size: self.max_page_size,
            });
        }
        Ok(())
    }

    /// Try one page: reuse the first freed slot large enough, else append if
    /// the page stays within budget. Row bytes and header are written under
    /// the same file lock.
    pub fn try_page(&self, page: &PageFile, row: &PendingRow) -> InsertResult<Option<(RowId, InsertOption)>> {
        let scheme = self.scheme;
        let max_page_size = self.max_page_size;

        self.pool.with_write_access(page.path(), |file| -> InsertResult<_> {
            file.seek(SeekFrom::Start(0))?;
            let mut header = PageHeader::read(file)?;
            let header_len = header.encoded_len() as u64;

            if !header.free_rows.is_empty() {
                let needed = PageRow::new(0, row.values.clone()).encoded_len(scheme)?;
                for row_id in header.free_rows.clone() {
                    let slot = RowCursor::new(&mut *file, scheme).seek_to_row(row_id, false)?;
                    if slot.capacity < needed {
                        continue;
                    }

                    file.seek(SeekFrom::Start(slot.offset))?;
                    PageRow::new(row_id, row.values.clone()).write_to(file, scheme, Some(slot.capacity))?;
                    header.reclaim(row_id);
                    header.rewrite(file, header_len)?;
                    return Ok(Some((row_id, InsertOption::Reused)));
                }
            }

            let current_size = file.seek(SeekFrom::End(0))?;
            if current_size + row.estimated_size() > max_page_size {
                return Ok(None);
            }

            let row_id = header.next_append_id();
            PageRow::new(row_id, row.values.clone()).write_to(file, scheme, None)?;
            header.rows_count += 1;
            header.rewrite(file, header_len)?;
            Ok(Some((row_id, InsertOption::Appended)))
        })
    }

    fn placed(&self, page: &PageFile, row_id: RowId, option: InsertOption) -> InsertOutcome {
        debug!(
            "Inserted row {} into {} ({:?})",
            row_id,
            page.path().display(),
            option
        );
        InsertOutcome {
            page: page.sequence(),
            row_id,
            option,
        }
    }
}

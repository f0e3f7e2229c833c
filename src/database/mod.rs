use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::catalog::{CatalogError, SchemaCatalog};
use crate::config::{ConfigError, EngineConfig};
use crate::file::{FileError, FileHandlePool};
use crate::insert::{
    InsertError, InsertOption, InsertOutcome, InsertionPlanner, PageAllocator, PendingRow,
    RowUpdate, SequentialPageAllocator,
};
use crate::record::{PageFile, PageHeader, PageRow, RecordError, RowCursor, TableScheme};
use crate::scan::{ConditionGroup, ScanError, ScanExecutor, ScanPlanner, ScanQuery};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Insert error: {0}")]
    Insert(#[from] InsertError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Flat error tag reported to callers of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TableDoesntExist,
    TableAlreadyExists,
    ColumnDoesntExist,
    RecordDefinitionInvalid,
    InvalidCondition,
    InvalidOperandType,
    UnsupportedValueType,
    RowNotFound,
    NoPageAvailable,
    UnknownFileHandle,
    ConstraintViolation,
    InvalidValue,
    Corrupted,
    Config,
    Io,
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::File(e) => file_kind(e),
            DatabaseError::Record(e) => record_kind(e),
            DatabaseError::Catalog(e) => catalog_kind(e),
            DatabaseError::Scan(e) => scan_kind(e),
            DatabaseError::Insert(e) => match e {
                InsertError::Record(e) => record_kind(e),
                InsertError::File(e) => file_kind(e),
                InsertError::Catalog(e) => catalog_kind(e),
                InsertError::Scan(e) => scan_kind(e),
                InsertError::ColumnDoesntExist { .. } => ErrorKind::ColumnDoesntExist,
                InsertError::ValueCountMismatch { .. } => ErrorKind::InvalidValue,
                InsertError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
                InsertError::RowTooLarge { .. } | InsertError::NoPageAvailable { .. } => {
                    ErrorKind::NoPageAvailable
                }
            },
            DatabaseError::Config(_) => ErrorKind::Config,
        }
    }
}

fn file_kind(err: &FileError) -> ErrorKind {
    match err {
        FileError::UnknownFileHandle(_) => ErrorKind::UnknownFileHandle,
        _ => ErrorKind::Io,
    }
}

fn record_kind(err: &RecordError) -> ErrorKind {
    match err {
        RecordError::File(e) => file_kind(e),
        RecordError::Io(_) => ErrorKind::Io,
        RecordError::UnsupportedValueType { .. } => ErrorKind::UnsupportedValueType,
        RecordError::InvalidValue(_)
        | RecordError::TypeMismatch { .. }
        | RecordError::SchemaMismatch(_) => ErrorKind::InvalidValue,
        RecordError::RowNotFound { .. } => ErrorKind::RowNotFound,
        RecordError::Corrupted(_) => ErrorKind::Corrupted,
        RecordError::NullConstraintViolation(_) => ErrorKind::ConstraintViolation,
    }
}

fn catalog_kind(err: &CatalogError) -> ErrorKind {
    match err {
        CatalogError::Io(_) => ErrorKind::Io,
        CatalogError::Record(e) => record_kind(e),
        CatalogError::TableDoesntExist(_) => ErrorKind::TableDoesntExist,
        CatalogError::TableAlreadyExists(_) => ErrorKind::TableAlreadyExists,
        CatalogError::ColumnDoesntExist { .. } => ErrorKind::ColumnDoesntExist,
        CatalogError::RecordDefinitionInvalid { .. } => ErrorKind::RecordDefinitionInvalid,
    }
}

fn scan_kind(err: &ScanError) -> ErrorKind {
    match err {
        ScanError::Record(e) => record_kind(e),
        ScanError::File(e) => file_kind(e),
        ScanError::ColumnNotFound(_) => ErrorKind::ColumnDoesntExist,
        ScanError::InvalidCondition(_) => ErrorKind::InvalidCondition,
        ScanError::InvalidOperandType { .. } => ErrorKind::InvalidOperandType,
    }
}

/// Storage engine for one database: scans, inserts and deletes over the
/// paged tables under `{data_dir}/{database}/records`.
///
/// Every method takes `&self`; a `Database` can be shared across threads.
/// Writers to the same table are serialised, readers are not.
pub struct Database {
    config: EngineConfig,
    catalog: RwLock<SchemaCatalog>,
    pool: FileHandlePool,
    allocator: Option<Box<dyn PageAllocator>>,
    write_locks: DashMap<String, Arc<Mutex<()>>, RandomState>,
}

impl Database {
    pub fn open(config: EngineConfig) -> DatabaseResult<Self> {
        let catalog = SchemaCatalog::load_all(&config.data_dir, &config.database)?;
        let pool = FileHandlePool::with_max_files(config.pool_access, config.max_open_files);
        let allocator: Option<Box<dyn PageAllocator>> = if config.allocate_pages {
            Some(Box::new(SequentialPageAllocator::new(config.max_pages_per_table)))
        } else {
            None
        };

        info!(
            "Opened database {} ({} tables)",
            config.database,
            catalog.table_names().len()
        );

        Ok(Self {
            config,
            catalog: RwLock::new(catalog),
            pool,
            allocator,
            write_locks: DashMap::with_hasher(RandomState::new()),
        })
    }

    /// Replace the page allocator; `None` makes a full table fail with
    /// `NoPageAvailable`
    pub fn with_allocator(mut self, allocator: Option<Box<dyn PageAllocator>>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &FileHandlePool {
        &self.pool
    }

    /// Table names in sorted order
    pub fn tables(&self) -> Vec<String> {
        self.catalog.read().table_names()
    }

    pub fn scheme(&self, table: &str) -> DatabaseResult<Arc<TableScheme>> {
        Ok(self.catalog.read().get_scheme(table)?)
    }

    pub fn create_table(&self, scheme: TableScheme) -> DatabaseResult<Arc<TableScheme>> {
        Ok(self.catalog.write().create_table(scheme)?)
    }

    /// Re-read table definitions from disk
    pub fn reload(&self) -> DatabaseResult<()> {
        Ok(self.catalog.write().reload()?)
    }

    /// Read a table: page order, then row order within each page
    pub fn scan(&self, query: &ScanQuery) -> DatabaseResult<Vec<PageRow>> {
        let (scheme, pages) = self.table_pages(&query.table)?;
        let plan = ScanPlanner::new(&self.pool).plan(scheme, pages, query)?;
        let rows = ScanExecutor::new(&self.pool)
            .parallel(self.config.parallel_scan)
            .execute(&plan)?;
        Ok(rows)
    }

    /// Insert one row given as `(column, literal)` pairs; `None` is NULL
    pub fn insert(
        &self,
        table: &str,
        columns: &[&str],
        values: &[Option<&str>],
    ) -> DatabaseResult<InsertOutcome> {
        let lock = self.write_lock(table);
        let _guard = lock.lock();

        let (scheme, pages) = self.table_pages(table)?;
        let mut row = PendingRow::from_literals(&scheme, columns, values)?;

        let existing = if row.needs_existing_rows(&scheme) {
            let plan = ScanPlanner::new(&self.pool).plan(
                Arc::clone(&scheme),
                pages.clone(),
                &ScanQuery::new(table),
            )?;
            ScanExecutor::new(&self.pool).execute(&plan)?
        } else {
            Vec::new()
        };
        row.apply_constraints(&scheme, &existing)?;

        let table_dir = self.catalog.read().table_dir(table);
        let outcome = InsertionPlanner::new(&self.pool, &scheme, self.config.max_page_size).insert(
            &pages,
            &row,
            self.allocator.as_deref(),
            &table_dir,
        )?;
        Ok(outcome)
    }

    /// Mark live rows matching `predicate` (all rows when `None`) as free.
    /// Their bytes stay in place until an insert reuses the slot.
    pub fn delete(&self, table: &str, predicate: Option<&ConditionGroup>) -> DatabaseResult<usize> {
        let lock = self.write_lock(table);
        let _guard = lock.lock();

        let (scheme, pages) = self.table_pages(table)?;
        let predicate = predicate.map(|p| p.prepare(&scheme)).transpose()?;

        let mut deleted = 0;
        for page in &pages {
            deleted += self.pool.with_write_access(page.path(), |file| -> DatabaseResult<usize> {
                let mut cursor = RowCursor::new(&mut *file, &scheme);
                let mut header = cursor.read_header()?;
                let old_len = header.encoded_len() as u64;

                let mut matched = Vec::new();
                while let Some(row) = cursor.read_row()? {
                    if header.is_free(row.row_id) {
                        continue;
                    }
                    if let Some(predicate) = &predicate {
                        if !predicate.evaluate(&row)? {
                            continue;
                        }
                    }
                    matched.push(row.row_id);
                }

                if matched.is_empty() {
                    return Ok(0);
                }
                for row_id in &matched {
                    header.release(*row_id);
                }
                header.rewrite(file, old_len)?;
                debug!("Freed {} rows in {}", matched.len(), page.path().display());
                Ok(matched.len())
            })?;
        }

        info!("Deleted {} rows from {}", deleted, table);
        Ok(deleted)
    }

    /// Assign `(column, literal)` pairs to live rows matching `predicate`
    /// (all rows when `None`) and return how many rows changed.
    ///
    /// The predicate is evaluated once per row, against its values before
    /// the update. Constraints are checked for every changed row before any
    /// byte is written. A row that still fits its slot is rewritten in
    /// place; one that outgrew it is inserted again like a new row and its
    /// old slot freed afterwards, so it may move to another page.
    pub fn update(
        &self,
        table: &str,
        columns: &[&str],
        values: &[Option<&str>],
        predicate: Option<&ConditionGroup>,
    ) -> DatabaseResult<usize> {
        let lock = self.write_lock(table);
        let _guard = lock.lock();

        let (scheme, pages) = self.table_pages(table)?;
        let update = RowUpdate::from_literals(&scheme, columns, values)?;
        let predicate = predicate.map(|p| p.prepare(&scheme)).transpose()?;

        // Every live row with its page, then the table as it will look
        let mut located = Vec::new();
        for (page_idx, page) in pages.iter().enumerate() {
            let live = self.pool.with_file(page.path(), |file| -> DatabaseResult<Vec<PageRow>> {
                let mut cursor = RowCursor::new(file, &scheme);
                let header = cursor.read_header()?;
                let mut live = Vec::new();
                while let Some(row) = cursor.read_row()? {
                    if !header.is_free(row.row_id) {
                        live.push(row);
                    }
                }
                Ok(live)
            })?;
            located.extend(live.into_iter().map(|row| (page_idx, row)));
        }

        let mut after = Vec::with_capacity(located.len());
        let mut changed = Vec::new();
        for (pos, (_, row)) in located.iter().enumerate() {
            let matches = match &predicate {
                Some(predicate) => predicate.evaluate(row)?,
                None => true,
            };
            if matches {
                after.push(update.apply(row));
                changed.push(pos);
            } else {
                after.push(row.clone());
            }
        }
        if changed.is_empty() {
            return Ok(0);
        }
        update.check(&scheme, &after, &changed)?;

        let planner = InsertionPlanner::new(&self.pool, &scheme, self.config.max_page_size);
        let mut writes = Vec::with_capacity(changed.len());
        for &pos in &changed {
            let row = &after[pos];
            let needed = row.encoded_len(&scheme)?;
            let pending = PendingRow::from_values(&scheme, row.values.clone())?;
            planner.check_fits(&pending)?;
            writes.push((pos, needed, pending));
        }

        let mut in_place = 0;
        let mut outgrown = Vec::new();
        for (pos, needed, pending) in writes {
            let (page_idx, old) = &located[pos];
            let page = &pages[*page_idx];
            let rewritten = self.pool.with_write_access(page.path(), |file| -> DatabaseResult<bool> {
                let slot = RowCursor::new(&mut *file, &scheme).seek_to_row(old.row_id, false)?;
                if needed > slot.capacity {
                    return Ok(false);
                }
                after[pos].write_to(file, &scheme, Some(slot.capacity))?;
                Ok(true)
            })?;
            if rewritten {
                in_place += 1;
            } else {
                outgrown.push((page, old.row_id, pending));
            }
        }

        let table_dir = self.catalog.read().table_dir(table);
        let mut current_pages = pages.clone();
        for (page, row_id, pending) in &outgrown {
            let outcome = planner.insert(
                &current_pages,
                pending,
                self.allocator.as_deref(),
                &table_dir,
            )?;
            if outcome.option == InsertOption::NewPage {
                current_pages = self.table_pages(table)?.1;
            }

            self.pool.with_write_access(page.path(), |file| -> DatabaseResult<()> {
                let mut header = RowCursor::new(&mut *file, &scheme).read_header()?;
                let old_len = header.encoded_len() as u64;
                header.release(*row_id);
                header.rewrite(file, old_len)?;
                Ok(())
            })?;
            debug!(
                "Moved row {} of {} to row {} of page {}",
                row_id,
                page.path().display(),
                outcome.row_id,
                outcome.page
            );
        }

        info!(
            "Updated {} rows in {} ({} in place, {} moved)",
            changed.len(),
            table,
            in_place,
            outgrown.len()
        );
        Ok(changed.len())
    }

    /// Header of every page of a table, in page order
    pub fn page_headers(&self, table: &str) -> DatabaseResult<Vec<(PageFile, PageHeader)>> {
        let (scheme, pages) = self.table_pages(table)?;
        pages
            .into_iter()
            .map(|page| {
                let header = self.pool.with_file(page.path(), |file| -> DatabaseResult<_> {
                    Ok(RowCursor::new(file, &scheme).read_header()?)
                })?;
                Ok((page, header))
            })
            .collect()
    }

    /// Close every pooled file
    pub fn dispose(&self) {
        self.pool.dispose_all();
    }

    fn table_pages(&self, table: &str) -> DatabaseResult<(Arc<TableScheme>, Vec<PageFile>)> {
        let catalog = self.catalog.read();
        let scheme = catalog.get_scheme(table)?;
        let pages = catalog.list_page_files(table)?;
        Ok((scheme, pages))
    }

    fn write_lock(&self, table: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(table.to_string())
            .or_default()
            .clone()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests;

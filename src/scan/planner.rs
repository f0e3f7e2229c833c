use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use log::debug;

use super::condition::{ConditionGroup, PreparedCondition};
use super::{ScanError, ScanResult};
use crate::file::FileHandlePool;
use crate::record::{PageFile, PageHeader, TableScheme};

/// A table read as requested by the query layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanQuery {
    pub table: String,
    /// Output columns in output order; `None` keeps every column
    pub columns: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub predicate: Option<ConditionGroup>,
}

impl ScanQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, predicate: ConditionGroup) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// How many matching rows to take from one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCap {
    All,
    UpTo(u32),
}

/// One page to visit
#[derive(Debug, Clone)]
pub struct PageWorkItem {
    pub page: PageFile,
    /// Header read while planning, reused instead of decoding it again
    pub header: Option<PageHeader>,
    pub cap: RowCap,
}

/// Everything the executor needs for one table read
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub scheme: Arc<TableScheme>,
    /// Column positions to emit, resolved before any page is read
    pub projection: Option<Vec<usize>>,
    pub predicate: Option<PreparedCondition>,
    pub items: Vec<PageWorkItem>,
}

pub struct ScanPlanner<'a> {
    pool: &'a FileHandlePool,
}

impl<'a> ScanPlanner<'a> {
    pub fn new(pool: &'a FileHandlePool) -> Self {
        Self { pool }
    }

    /// Build the page visit list for `query`.
    ///
    /// `pages` must already be in ascending sequence order. Without a limit
    /// every page is visited and no header is read here. With a limit, headers
    /// are read in page order and enumeration stops once enough live rows are
    /// covered; later pages are never opened.
    pub fn plan(
        &self,
        scheme: Arc<TableScheme>,
        pages: Vec<PageFile>,
        query: &ScanQuery,
    ) -> ScanResult<ScanPlan> {
        let projection = match &query.columns {
            Some(columns) => Some(
                columns
                    .iter()
                    .map(|name| {
                        scheme
                            .find_column(name)
                            .ok_or_else(|| ScanError::ColumnNotFound(name.clone()))
                    })
                    .collect::<ScanResult<Vec<_>>>()?,
            ),
            None => None,
        };

        let predicate = match &query.predicate {
            Some(group) => Some(group.prepare(&scheme)?),
            None => None,
        };

        let items = match query.limit {
            None => pages
                .into_iter()
                .map(|page| PageWorkItem {
                    page,
                    header: None,
                    cap: RowCap::All,
                })
                .collect(),
            Some(limit) => self.plan_limited(pages, limit)?,
        };

        debug!(
            "Planned scan of {}: {} pages, limit {:?}",
            scheme.table_name(),
            items.len(),
            query.limit
        );

        Ok(ScanPlan {
            scheme,
            projection,
            predicate,
            items,
        })
    }

    fn plan_limited(&self, pages: Vec<PageFile>, limit: u32) -> ScanResult<Vec<PageWorkItem>> {
        let mut items = Vec::new();
        let mut remaining = limit;

        for page in pages {
            if remaining == 0 {
                break;
            }

            let header = self.read_header(&page)?;
            let cap = if header.rows_count <= remaining {
                RowCap::All
            } else {
                RowCap::UpTo(remaining)
            };
            remaining -= header.rows_count.min(remaining);

            items.push(PageWorkItem {
                page,
                header: Some(header),
                cap,
            });
        }

        Ok(items)
    }

    fn read_header(&self, page: &PageFile) -> ScanResult<PageHeader> {
        self.pool.with_file(page.path(), |file| -> ScanResult<PageHeader> {
            file.seek(SeekFrom::Start(0))?;
            Ok(PageHeader::read(file)?)
        })
    }
}

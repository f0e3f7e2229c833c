use std::thread;

use log::{debug, trace};

use super::ScanResult;
use super::planner::{PageWorkItem, RowCap, ScanPlan};
use crate::file::FileHandlePool;
use crate::record::{PageHeader, PageRow, RowCursor};

/// Streams planned pages through the row decoder
pub struct ScanExecutor<'a> {
    pool: &'a FileHandlePool,
    parallel: bool,
}

impl<'a> ScanExecutor<'a> {
    pub fn new(pool: &'a FileHandlePool) -> Self {
        Self {
            pool,
            parallel: false,
        }
    }

    /// Spread work items over scoped threads; output order is unchanged
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run the whole plan and merge the pages in visit order
    pub fn execute(&self, plan: &ScanPlan) -> ScanResult<Vec<PageRow>> {
        let per_page = if self.parallel && plan.items.len() > 1 {
            self.execute_parallel(plan)?
        } else {
            plan.items
                .iter()
                .map(|item| self.execute_work_item(plan, item))
                .collect::<ScanResult<Vec<_>>>()?
        };

        let rows = merge_results(per_page);
        debug!(
            "Scanned {}: {} rows from {} pages",
            plan.scheme.table_name(),
            rows.len(),
            plan.items.len()
        );
        Ok(rows)
    }

    /// Read one page: skip freed slots, filter, cap, then project
    pub fn execute_work_item(&self, plan: &ScanPlan, item: &PageWorkItem) -> ScanResult<Vec<PageRow>> {
        self.pool.with_file(item.page.path(), |file| -> ScanResult<Vec<PageRow>> {
            let mut cursor = RowCursor::new(file, &plan.scheme);
            let read;
            let header: &PageHeader = match &item.header {
                Some(header) => {
                    cursor.skip_header()?;
                    header
                }
                None => {
                    read = cursor.read_header()?;
                    &read
                }
            };

            let mut rows = Vec::new();
            if item.cap == RowCap::UpTo(0) {
                return Ok(rows);
            }

            while let Some(row) = cursor.read_row()? {
                if header.is_free(row.row_id) {
                    continue;
                }
                if let Some(predicate) = &plan.predicate {
                    if !predicate.evaluate(&row)? {
                        continue;
                    }
                }

                rows.push(match &plan.projection {
                    Some(indices) => row.project(indices),
                    None => row,
                });

                if let RowCap::UpTo(cap) = item.cap {
                    if rows.len() >= cap as usize {
                        break;
                    }
                }
            }

            trace!("Page {} yielded {} rows", item.page.sequence(), rows.len());
            Ok(rows)
        })
    }

    fn execute_parallel(&self, plan: &ScanPlan) -> ScanResult<Vec<Vec<PageRow>>> {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(plan.items.len());
        let chunk_size = plan.items.len().div_ceil(workers);

        thread::scope(|scope| {
            let handles: Vec<_> = plan
                .items
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|item| self.execute_work_item(plan, item))
                            .collect::<ScanResult<Vec<_>>>()
                    })
                })
                .collect();

            let mut per_page = Vec::with_capacity(plan.items.len());
            for handle in handles {
                let chunk = handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;
                per_page.extend(chunk);
            }
            Ok(per_page)
        })
    }
}

/// Concatenate per-page results in page visit order
pub fn merge_results(per_page: Vec<Vec<PageRow>>) -> Vec<PageRow> {
    let total = per_page.iter().map(Vec::len).sum();
    let mut rows = Vec::with_capacity(total);
    for page in per_page {
        rows.extend(page);
    }
    rows
}

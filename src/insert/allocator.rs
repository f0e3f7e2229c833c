use std::path::Path;

use log::info;
use parking_lot::Mutex;

use super::{InsertError, InsertResult};
use crate::record::PageFile;

/// Supplies a fresh page when no existing page of a table can take a row
pub trait PageAllocator: Send + Sync {
    /// Create the next page for `table` in `dir`. `existing` is the current
    /// page list in ascending sequence order.
    fn allocate(&self, table: &str, dir: &Path, existing: &[PageFile]) -> InsertResult<PageFile>;
}

/// Continues the page numbering: `{Table}.{last + 1}.record`
pub struct SequentialPageAllocator {
    max_pages: Option<u32>,
    lock: Mutex<()>,
}

impl SequentialPageAllocator {
    pub fn new(max_pages: Option<u32>) -> Self {
        Self {
            max_pages,
            lock: Mutex::new(()),
        }
    }
}

impl Default for SequentialPageAllocator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PageAllocator for SequentialPageAllocator {
    fn allocate(&self, table: &str, dir: &Path, existing: &[PageFile]) -> InsertResult<PageFile> {
        let _guard = self.lock.lock();

        if let Some(max) = self.max_pages {
            if existing.len() as u64 >= max as u64 {
                return Err(InsertError::NoPageAvailable {
                    table: table.to_string(),
                    reason: format!("table already has the maximum of {} pages", max),
                });
            }
        }

        let sequence = match existing.iter().map(PageFile::sequence).max() {
            Some(last) => last.checked_add(1).ok_or_else(|| InsertError::NoPageAvailable {
                table: table.to_string(),
                reason: "page sequence exhausted".to_string(),
            })?,
            None => 0,
        };

        let page = PageFile::create(dir, table, sequence)?;
        info!("Allocated page {} for {}", page.path().display(), table);
        Ok(page)
    }
}

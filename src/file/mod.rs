mod error;
mod handle_pool;

use serde::{Deserialize, Serialize};

pub use error::{FileError, FileResult};
pub use handle_pool::{FileHandle, FileHandlePool};

/// Default page budget in bytes (8KB)
pub const MAX_PAGE_SIZE: u64 = 8192;

/// Default limit on simultaneously pooled page files
pub const MAX_OPEN_FILES: usize = 128;

/// Access mode a pooled page file is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    Read,
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::error::RecordResult;
use super::page::{PageHeader, PageId};

static PAGE_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<table>.+)\.(?P<seq>\d{4,})\.record$").expect("page file pattern is valid")
});

pub const RECORD_EXTENSION: &str = "record";
pub const DEFINITION_EXTENSION: &str = "def";

/// One page of a table: `{Table}.{NNNN}.record`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    path: PathBuf,
    table: String,
    sequence: PageId,
}

impl PageFile {
    /// File name for a page sequence number, zero-padded to at least 4 digits
    pub fn file_name(table: &str, sequence: PageId) -> String {
        format!("{}.{:04}.{}", table, sequence, RECORD_EXTENSION)
    }

    /// Recognise a page file by name; `None` for anything else in the directory
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = PAGE_FILE_NAME.captures(name)?;
        let sequence = caps["seq"].parse().ok()?;
        Some(Self {
            path: path.to_path_buf(),
            table: caps["table"].to_string(),
            sequence,
        })
    }

    /// Create a new empty page in `dir`. Fails if the file already exists.
    pub fn create(dir: &Path, table: &str, sequence: PageId) -> RecordResult<Self> {
        let path = dir.join(Self::file_name(table, sequence));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        PageHeader::new(sequence).write(&mut file)?;
        file.sync_all()?;

        Ok(Self {
            path,
            table: table.to_string(),
            sequence,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sequence(&self) -> PageId {
        self.sequence
    }

    /// Current file length in bytes
    pub fn size(&self) -> RecordResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(PageFile::file_name("users", 7), "users.0007.record");
        assert_eq!(PageFile::file_name("users", 12345), "users.12345.record");
    }

    #[test]
    fn test_parse() {
        let page = PageFile::parse(Path::new("/db/records/t/t.0012.record")).unwrap();
        assert_eq!(page.table(), "t");
        assert_eq!(page.sequence(), 12);

        let dotted = PageFile::parse(Path::new("my.table.0001.record")).unwrap();
        assert_eq!(dotted.table(), "my.table");

        assert!(PageFile::parse(Path::new("t.def")).is_none());
        assert!(PageFile::parse(Path::new("t.12.record")).is_none());
        assert!(PageFile::parse(Path::new("t.0001.record.bak")).is_none());
    }

    #[test]
    fn test_create_writes_empty_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let page = PageFile::create(temp_dir.path(), "t", 3).unwrap();
        assert_eq!(page.size().unwrap(), 12);

        let bytes = std::fs::read(page.path()).unwrap();
        let header = PageHeader::read(&mut std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(header, PageHeader::new(3));

        assert!(PageFile::create(temp_dir.path(), "t", 3).is_err());
    }
}

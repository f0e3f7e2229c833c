use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::RandomState;
use log::{debug, trace};
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};

use super::error::{FileError, FileResult};
use super::{AccessMode, MAX_OPEN_FILES};

/// An open page file together with the mode it was opened in
#[derive(Debug)]
struct PooledFile {
    file: File,
    mode: AccessMode,
}

impl PooledFile {
    fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

/// Shared handle to a pooled page file.
///
/// Cloning is cheap; every clone refers to the same underlying `File`.
/// While a clone is held outside the pool the handle counts as checked out
/// and is never evicted.
#[derive(Debug, Clone)]
pub struct FileHandle {
    path: PathBuf,
    inner: Arc<Mutex<PooledFile>>,
}

impl FileHandle {
    pub fn mode(&self) -> AccessMode {
        self.inner.lock().mode
    }

    /// Check whether two handles refer to the same pooled file
    pub fn same_file(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    fn lock(&self) -> MutexGuard<'_, PooledFile> {
        self.inner.lock()
    }
}

type HandleCache = LruCache<PathBuf, FileHandle, RandomState>;

/// Keyed cache of open page files shared by concurrent scans and inserts.
///
/// The LRU map from file identity to handle sits behind one lock; byte-level
/// access to one file is serialised by that file's own lock for the duration
/// of a scoped `with_*` call. When `max_open_files` handles are pooled, the
/// least recently used idle handle is closed to make room. If every handle
/// is checked out the pool grows past the limit and shrinks back on later
/// opens.
pub struct FileHandlePool {
    handles: Mutex<HandleCache>,
    access: AccessMode,
    max_open_files: usize,
}

impl FileHandlePool {
    /// Create a pool that opens files with the given access mode
    pub fn new(access: AccessMode) -> Self {
        Self::with_max_files(access, MAX_OPEN_FILES)
    }

    /// Create a pool holding at most `max_open_files` idle handles
    pub fn with_max_files(access: AccessMode, max_open_files: usize) -> Self {
        Self {
            handles: Mutex::new(LruCache::unbounded_with_hasher(RandomState::new())),
            access,
            max_open_files: max_open_files.max(1),
        }
    }

    /// Return the pooled handle for `path`, opening it on first use or after
    /// it was evicted.
    ///
    /// Concurrent callers resolving the same file observe one handle.
    pub fn get_or_open<P: AsRef<Path>>(&self, path: P) -> FileResult<FileHandle> {
        let key = canonical(path.as_ref())?;
        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(&key) {
            return Ok(handle.clone());
        }

        if !evict_idle(&mut handles, self.max_open_files - 1) {
            debug!(
                "All {} pooled files are checked out, exceeding the limit of {}",
                handles.len(),
                self.max_open_files
            );
        }

        let file = open_with(&key, self.access)?;
        debug!("Opened {} ({:?})", key.display(), self.access);
        let handle = FileHandle {
            path: key.clone(),
            inner: Arc::new(Mutex::new(PooledFile {
                file,
                mode: self.access,
            })),
        };
        handles.put(key, handle.clone());
        Ok(handle)
    }

    /// Reopen a pooled file with another access mode, keeping its stream position
    pub fn change_access<P: AsRef<Path>>(&self, path: P, mode: AccessMode) -> FileResult<()> {
        let handle = self.lookup(path.as_ref())?;
        let mut pooled = handle.lock();
        reopen(&handle.path, &mut pooled, mode)
    }

    /// Run `f` with exclusive access to the file's stream
    pub fn with_file<P, T, E, F>(&self, path: P, f: F) -> Result<T, E>
    where
        P: AsRef<Path>,
        E: From<FileError>,
        F: FnOnce(&mut File) -> Result<T, E>,
    {
        let handle = self.get_or_open(path)?;
        let result = f(handle.lock().file_mut());
        self.release(handle);
        result
    }

    /// Run `f` with exclusive, writable access to the file's stream.
    ///
    /// A read-only handle is upgraded before `f` runs and stays upgraded
    /// while it is pooled, so no other caller can observe the handle mid-flip.
    pub fn with_write_access<P, T, E, F>(&self, path: P, f: F) -> Result<T, E>
    where
        P: AsRef<Path>,
        E: From<FileError>,
        F: FnOnce(&mut File) -> Result<T, E>,
    {
        let handle = self.get_or_open(path)?;
        let result = {
            let mut pooled = handle.lock();
            if !pooled.mode.is_writable() {
                reopen(&handle.path, &mut pooled, AccessMode::ReadWrite)?;
            }
            f(pooled.file_mut())
        };
        self.release(handle);
        result
    }

    /// Close every pooled handle
    pub fn dispose_all(&self) {
        let mut handles = self.handles.lock();
        let count = handles.len();
        handles.clear();
        debug!("Disposed {} pooled file handles", count);
    }

    /// Check if a file is currently pooled
    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        self.lookup(path.as_ref()).is_ok()
    }

    /// Get the number of currently pooled files
    pub fn open_file_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Give a handle back; a pool that grew past its limit shrinks again
    fn release(&self, handle: FileHandle) {
        drop(handle);
        let mut handles = self.handles.lock();
        if handles.len() > self.max_open_files {
            evict_idle(&mut handles, self.max_open_files);
        }
    }

    fn lookup(&self, path: &Path) -> FileResult<FileHandle> {
        let key = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        self.handles
            .lock()
            .peek(&key)
            .cloned()
            .ok_or(FileError::UnknownFileHandle(key))
    }
}

impl Default for FileHandlePool {
    fn default() -> Self {
        Self::new(AccessMode::default())
    }
}

/// Close least recently used idle handles until at most `limit` remain.
/// Returns false when only checked-out handles are left above the limit.
fn evict_idle(handles: &mut HandleCache, limit: usize) -> bool {
    while handles.len() > limit {
        let victim = handles
            .iter()
            .rev()
            .find(|(_, handle)| handle.is_idle())
            .map(|(path, _)| path.clone());

        match victim {
            Some(path) => {
                handles.pop(&path);
                trace!("Evicted {}", path.display());
            }
            None => return false,
        }
    }
    true
}

fn canonical(path: &Path) -> FileResult<PathBuf> {
    path.canonicalize()
        .map_err(|_| FileError::FileNotFound(path.display().to_string()))
}

fn open_with(path: &Path, mode: AccessMode) -> FileResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(mode.is_writable())
        .open(path)?;
    Ok(file)
}

fn reopen(path: &Path, pooled: &mut PooledFile, mode: AccessMode) -> FileResult<()> {
    let position = pooled.file.stream_position()?;
    let mut file = open_with(path, mode)?;
    file.seek(SeekFrom::Start(position))?;
    trace!(
        "Reopened {} {:?} -> {:?} at offset {}",
        path.display(),
        pooled.mode,
        mode,
        position
    );
    pooled.file = file;
    pooled.mode = mode;
    Ok(())
}

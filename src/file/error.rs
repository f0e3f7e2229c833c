use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File handle was never opened through this pool: {}", .0.display())]
    UnknownFileHandle(PathBuf),
}

pub type FileResult<T> = Result<T, FileError>;

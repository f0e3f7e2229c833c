use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::file::{AccessMode, MAX_OPEN_FILES, MAX_PAGE_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine settings, persisted as JSON. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root holding one directory per database
    pub data_dir: PathBuf,
    pub database: String,
    /// Page size budget checked before appending a row
    pub max_page_size: u64,
    /// Mode pooled files are first opened with
    pub pool_access: AccessMode,
    pub max_open_files: usize,
    /// Create a new page file when no existing page has room
    pub allocate_pages: bool,
    pub max_pages_per_table: Option<u32>,
    pub parallel_scan: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database: "default".to_string(),
            max_page_size: MAX_PAGE_SIZE,
            pool_access: AccessMode::Read,
            max_open_files: MAX_OPEN_FILES,
            allocate_pages: true,
            max_pages_per_table: None,
            parallel_scan: true,
        }
    }
}

impl EngineConfig {
    /// Default settings rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>, database: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// `{data_dir}/{database}/records`, one subdirectory per table
    pub fn records_root(&self) -> PathBuf {
        self.data_dir.join(&self.database).join("records")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_page_size, 8192);
        assert_eq!(config.pool_access, AccessMode::Read);
        assert_eq!(config.max_open_files, 128);
        assert!(config.allocate_pages);
        assert!(config.parallel_scan);
        assert_eq!(config.max_pages_per_table, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"database": "shop", "max_page_size": 512}"#).unwrap();
        assert_eq!(config.database, "shop");
        assert_eq!(config.max_page_size, 512);
        assert_eq!(config.max_open_files, 128);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");

        let mut config = EngineConfig::new(temp_dir.path(), "shop");
        config.pool_access = AccessMode::ReadWrite;
        config.max_pages_per_table = Some(4);
        config.save(&path).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
        assert_eq!(
            config.records_root(),
            temp_dir.path().join("shop").join("records")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = EngineConfig::load(Path::new("/nonexistent/engine.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}

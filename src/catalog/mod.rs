use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info, warn};
use thiserror::Error;

use crate::record::{
    ColumnScheme, DEFINITION_EXTENSION, PageFile, RECORD_EXTENSION, RecordError, TableScheme,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Table {0} doesn't exist")]
    TableDoesntExist(String),

    #[error("Table {0} already exists")]
    TableAlreadyExists(String),

    #[error("Column {column} doesn't exist in table {table}")]
    ColumnDoesntExist { table: String, column: String },

    #[error("Invalid definition of table {table} at line {line}: {reason}")]
    RecordDefinitionInvalid {
        table: String,
        line: usize,
        reason: String,
    },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Files kept in a table directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Record,
    Definition,
}

/// Column layouts of every table in one database, plus page enumeration.
///
/// Schemes are immutable once loaded; `reload` replaces them wholesale.
#[derive(Debug)]
pub struct SchemaCatalog {
    records_root: PathBuf,
    tables: AHashMap<String, Arc<TableScheme>>,
}

impl SchemaCatalog {
    /// Load every table under `{data_dir}/{database}/records`.
    /// A missing records directory is created empty.
    pub fn load_all(data_dir: &Path, database: &str) -> CatalogResult<Self> {
        let records_root = data_dir.join(database).join("records");
        Self::load_from(records_root)
    }

    /// Load every table directory under `records_root`
    pub fn load_from(records_root: PathBuf) -> CatalogResult<Self> {
        fs::create_dir_all(&records_root)?;

        let mut catalog = Self {
            records_root,
            tables: AHashMap::new(),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    /// Re-read all `.def` files from disk
    pub fn reload(&mut self) -> CatalogResult<()> {
        let mut tables = AHashMap::new();

        for entry in fs::read_dir(&self.records_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(table) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 table directory {:?}", entry.file_name());
                continue;
            };

            let def_path = definition_path(&entry.path(), &table);
            if !def_path.is_file() {
                warn!("Table directory {} has no definition file", table);
                continue;
            }

            let scheme = parse_definition(&table, &fs::read_to_string(&def_path)?)?;
            debug!("Loaded table {} ({} columns)", table, scheme.column_count());
            tables.insert(table, Arc::new(scheme));
        }

        info!(
            "Catalog loaded {} tables from {}",
            tables.len(),
            self.records_root.display()
        );
        self.tables = tables;
        Ok(())
    }

    pub fn records_root(&self) -> &Path {
        &self.records_root
    }

    /// Directory holding a table's definition and pages
    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.records_root.join(table)
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Get a table's column layout
    pub fn get_scheme(&self, table: &str) -> CatalogResult<Arc<TableScheme>> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| CatalogError::TableDoesntExist(table.to_string()))
    }

    /// Position of `column` in a table's column order
    pub fn column_index(&self, table: &str, column: &str) -> CatalogResult<usize> {
        self.get_scheme(table)?
            .find_column(column)
            .ok_or_else(|| CatalogError::ColumnDoesntExist {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Table names in sorted order
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Files of one kind in a table directory. Record files come back in
    /// ascending page sequence order, which is the scan order.
    pub fn list_files(&self, table: &str, kind: FileKind) -> CatalogResult<Vec<PathBuf>> {
        match kind {
            FileKind::Record => Ok(self
                .list_page_files(table)?
                .into_iter()
                .map(|page| page.path().to_path_buf())
                .collect()),
            FileKind::Definition => {
                self.get_scheme(table)?;
                Ok(vec![definition_path(&self.table_dir(table), table)])
            }
        }
    }

    /// Page files of a table sorted by their numeric sequence
    pub fn list_page_files(&self, table: &str) -> CatalogResult<Vec<PageFile>> {
        self.get_scheme(table)?;

        let mut pages = Vec::new();
        for entry in fs::read_dir(self.table_dir(table))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match PageFile::parse(&path) {
                Some(page) if page.table() == table => pages.push(page),
                _ => warn!("Ignoring unrecognised page file {}", path.display()),
            }
        }

        pages.sort_by_key(PageFile::sequence);
        Ok(pages)
    }

    /// Create a table directory with its definition file
    pub fn create_table(&mut self, scheme: TableScheme) -> CatalogResult<Arc<TableScheme>> {
        let table = scheme.table_name().to_string();
        if self.table_exists(&table) {
            return Err(CatalogError::TableAlreadyExists(table));
        }
        scheme.check()?;

        let dir = self.table_dir(&table);
        fs::create_dir_all(&dir)?;
        fs::write(definition_path(&dir, &table), scheme.to_definition())?;
        info!("Created table {} with {} columns", table, scheme.column_count());

        let scheme = Arc::new(scheme);
        self.tables.insert(table, Arc::clone(&scheme));
        Ok(scheme)
    }
}

fn definition_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.{}", table, DEFINITION_EXTENSION))
}

/// Build a scheme from `.def` contents; blank lines are ignored
fn parse_definition(table: &str, contents: &str) -> CatalogResult<TableScheme> {
    let invalid = |line: usize, reason: String| CatalogError::RecordDefinitionInvalid {
        table: table.to_string(),
        line,
        reason,
    };

    let mut columns = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let column = ColumnScheme::from_definition(line).map_err(|e| invalid(idx + 1, e.to_string()))?;
        columns.push(column);
    }

    let scheme = TableScheme::new(table, columns);
    scheme.check().map_err(|e| invalid(0, e.to_string()))?;
    Ok(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ColumnConstraint, SqlValueType};
    use tempfile::TempDir;

    fn write_table(root: &Path, table: &str, def: &str, pages: &[&str]) {
        let dir = root.join(table);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.def", table)), def).unwrap();
        for page in pages {
            fs::write(dir.join(page), b"").unwrap();
        }
    }

    #[test]
    fn test_load_all() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("shop").join("records");
        write_table(&root, "users", "id INTEGER PK AI\nname STRING NN\n", &[]);
        write_table(&root, "orders", "id INTEGER\n\ntotal FLOAT\n", &[]);

        let catalog = SchemaCatalog::load_all(temp_dir.path(), "shop").unwrap();
        assert_eq!(catalog.table_names(), vec!["orders", "users"]);
        assert!(catalog.table_exists("users"));
        assert!(!catalog.table_exists("missing"));

        let users = catalog.get_scheme("users").unwrap();
        assert_eq!(users.column_count(), 2);
        assert!(users.columns()[0].has_constraint(ColumnConstraint::AutoIncrement));
        assert_eq!(catalog.get_scheme("orders").unwrap().column_count(), 2);
    }

    #[test]
    fn test_missing_table() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = SchemaCatalog::load_all(temp_dir.path(), "empty").unwrap();
        assert!(matches!(
            catalog.get_scheme("nope"),
            Err(CatalogError::TableDoesntExist(_))
        ));
        assert!(matches!(
            catalog.list_page_files("nope"),
            Err(CatalogError::TableDoesntExist(_))
        ));
    }

    #[test]
    fn test_invalid_definition_line() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("db").join("records");
        write_table(&root, "broken", "id INTEGER\nlonely\n", &[]);

        let result = SchemaCatalog::load_all(temp_dir.path(), "db");
        match result {
            Err(CatalogError::RecordDefinitionInvalid { table, line, .. }) => {
                assert_eq!(table, "broken");
                assert_eq!(line, 2);
            }
            other => panic!("expected RecordDefinitionInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_token() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("db").join("records");
        write_table(&root, "t", "id WIDGET\n", &[]);

        let result = SchemaCatalog::load_all(temp_dir.path(), "db");
        assert!(matches!(result, Err(CatalogError::RecordDefinitionInvalid { line: 1, .. })));
    }

    #[test]
    fn test_page_files_sorted_numerically() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("db").join("records");
        write_table(
            &root,
            "t",
            "id INTEGER\n",
            &["t.0010.record", "t.0002.record", "t.10000.record", "t.0000.record", "notes.txt"],
        );

        let catalog = SchemaCatalog::load_all(temp_dir.path(), "db").unwrap();
        let sequences: Vec<u32> = catalog
            .list_page_files("t")
            .unwrap()
            .iter()
            .map(PageFile::sequence)
            .collect();
        assert_eq!(sequences, vec![0, 2, 10, 10000]);

        let defs = catalog.list_files("t", FileKind::Definition).unwrap();
        assert_eq!(defs, vec![root.join("t").join("t.def")]);
        assert_eq!(catalog.list_files("t", FileKind::Record).unwrap().len(), 4);
    }

    #[test]
    fn test_create_table_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut catalog = SchemaCatalog::load_all(temp_dir.path(), "db").unwrap();

        let scheme = TableScheme::new(
            "people",
            vec![
                ColumnScheme::new("id", SqlValueType::Integer, &[ColumnConstraint::PrimaryKey]),
                ColumnScheme::new("tags", SqlValueType::IntegerArray, &[]),
            ],
        );
        catalog.create_table(scheme.clone()).unwrap();
        assert!(matches!(
            catalog.create_table(scheme.clone()),
            Err(CatalogError::TableAlreadyExists(_))
        ));
        assert_eq!(catalog.column_index("people", "tags").unwrap(), 1);
        assert!(matches!(
            catalog.column_index("people", "age"),
            Err(CatalogError::ColumnDoesntExist { .. })
        ));

        let reloaded = SchemaCatalog::load_all(temp_dir.path(), "db").unwrap();
        assert_eq!(*reloaded.get_scheme("people").unwrap(), scheme);
    }
}

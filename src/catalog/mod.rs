//! Catalog: database directories, per-table `.meta` files, and the
//! current-database state machine. Data and index files of table `t` in
//! database `d` live at `<base>/d/t.dat` and `<base>/d/t_<col>.idx`; the
//! executor owns those files, the catalog owns the metadata.

mod error;
mod meta;

pub use error::{CatalogError, CatalogResult};
pub use meta::{ColumnMeta, ExplicitIndexMeta, ForeignKeyMeta, TableMeta};

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

pub struct Catalog {
    base_dir: PathBuf,
    current_db: Option<String>,
    tables: HashMap<String, TableMeta>,
}

impl Catalog {
    pub fn new(base_dir: &str) -> CatalogResult<Self> {
        let base_dir = PathBuf::from(base_dir);
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            current_db: None,
            tables: HashMap::new(),
        })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn current_database_path(&self) -> CatalogResult<PathBuf> {
        let name = self
            .current_db
            .as_ref()
            .ok_or(CatalogError::NoDatabaseSelected)?;
        Ok(self.base_dir.join(name))
    }

    pub fn table_data_path(&self, table: &str) -> CatalogResult<PathBuf> {
        Ok(self.current_database_path()?.join(format!("{}.dat", table)))
    }

    fn table_meta_path(&self, table: &str) -> CatalogResult<PathBuf> {
        Ok(self.current_database_path()?.join(format!("{}.meta", table)))
    }

    pub fn create_database(&mut self, name: &str) -> CatalogResult<()> {
        let path = self.database_path(name);
        if path.exists() {
            return Err(CatalogError::DatabaseExists(name.to_string()));
        }
        fs::create_dir(&path)?;
        Ok(())
    }

    /// Remove a database directory recursively. The caller must already
    /// have flushed and closed any open stores and indexes.
    pub fn drop_database(&mut self, name: &str) -> CatalogResult<()> {
        let path = self.database_path(name);
        if !path.exists() {
            return Err(CatalogError::DatabaseNotFound(name.to_string()));
        }
        if self.current_db.as_deref() == Some(name) {
            self.current_db = None;
            self.tables.clear();
        }
        fs::remove_dir_all(&path)?;
        Ok(())
    }

    pub fn list_databases(&self) -> CatalogResult<Vec<String>> {
        let mut databases = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                databases.push(name.to_string());
            }
        }
        databases.sort();
        Ok(databases)
    }

    /// Switch the current database, loading every table's `.meta` file.
    /// The caller must already have flushed and closed the previous
    /// database's stores and indexes.
    pub fn use_database(&mut self, name: &str) -> CatalogResult<()> {
        let path = self.database_path(name);
        if !path.exists() {
            return Err(CatalogError::DatabaseNotFound(name.to_string()));
        }

        let mut tables = HashMap::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(table_name) = file_name.strip_suffix(".meta") {
                let text = fs::read_to_string(entry.path())?;
                let meta = TableMeta::parse(&text)?;
                tables.insert(table_name.to_string(), meta);
            }
        }

        self.current_db = Some(name.to_string());
        self.tables = tables;
        Ok(())
    }

    pub fn close_current(&mut self) {
        self.current_db = None;
        self.tables.clear();
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table(&self, name: &str) -> CatalogResult<&TableMeta> {
        if self.current_db.is_none() {
            return Err(CatalogError::NoDatabaseSelected);
        }
        self.tables
            .get(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> CatalogResult<&mut TableMeta> {
        if self.current_db.is_none() {
            return Err(CatalogError::NoDatabaseSelected);
        }
        self.tables
            .get_mut(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn list_tables(&self) -> CatalogResult<Vec<String>> {
        if self.current_db.is_none() {
            return Err(CatalogError::NoDatabaseSelected);
        }
        let mut tables: Vec<String> = self.tables.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    /// Iterate the current database's metadata (foreign-key sweeps).
    pub fn tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.values()
    }

    pub fn create_table(&mut self, meta: TableMeta) -> CatalogResult<()> {
        if self.current_db.is_none() {
            return Err(CatalogError::NoDatabaseSelected);
        }
        if self.tables.contains_key(&meta.name) {
            return Err(CatalogError::TableExists(meta.name.clone()));
        }

        let path = self.table_meta_path(&meta.name)?;
        fs::write(path, meta.emit())?;
        self.tables.insert(meta.name.clone(), meta);
        Ok(())
    }

    /// Drop a table's metadata; data and index files are the executor's to
    /// remove.
    pub fn drop_table(&mut self, name: &str) -> CatalogResult<()> {
        if self.current_db.is_none() {
            return Err(CatalogError::NoDatabaseSelected);
        }
        if self.tables.remove(name).is_none() {
            return Err(CatalogError::TableNotFound(name.to_string()));
        }

        let path = self.table_meta_path(name)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Persist one table's metadata to its `.meta` file.
    pub fn save_table(&self, name: &str) -> CatalogResult<()> {
        let meta = self.table(name)?;
        let path = self.table_meta_path(name)?;
        fs::write(path, meta.emit())?;
        Ok(())
    }

    /// Persist every table of the current database.
    pub fn save_all(&self) -> CatalogResult<()> {
        if self.current_db.is_none() {
            return Ok(());
        }
        for name in self.tables.keys() {
            self.save_table(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DataType;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let temp_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(temp_dir.path().to_str().unwrap()).unwrap();
        (temp_dir, catalog)
    }

    fn simple_meta(name: &str) -> TableMeta {
        TableMeta::new(
            name.to_string(),
            vec![ColumnMeta {
                name: "id".to_string(),
                data_type: DataType::Int,
                not_null: true,
                default_value: None,
            }],
        )
    }

    #[test]
    fn test_database_lifecycle() {
        let (_temp, mut catalog) = setup();

        assert!(catalog.list_databases().unwrap().is_empty());
        catalog.create_database("db1").unwrap();
        catalog.create_database("db2").unwrap();
        assert!(matches!(
            catalog.create_database("db1"),
            Err(CatalogError::DatabaseExists(_))
        ));
        assert_eq!(catalog.list_databases().unwrap(), vec!["db1", "db2"]);

        catalog.drop_database("db1").unwrap();
        assert_eq!(catalog.list_databases().unwrap(), vec!["db2"]);
        assert!(matches!(
            catalog.drop_database("db1"),
            Err(CatalogError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn test_use_database_required() {
        let (_temp, mut catalog) = setup();
        catalog.create_database("db").unwrap();

        assert!(matches!(
            catalog.create_table(simple_meta("t")),
            Err(CatalogError::NoDatabaseSelected)
        ));
        assert!(matches!(
            catalog.use_database("missing"),
            Err(CatalogError::DatabaseNotFound(_))
        ));

        catalog.use_database("db").unwrap();
        assert_eq!(catalog.current_database(), Some("db"));
    }

    #[test]
    fn test_table_metadata_persists_across_switch() {
        let (_temp, mut catalog) = setup();
        catalog.create_database("a").unwrap();
        catalog.create_database("b").unwrap();

        catalog.use_database("a").unwrap();
        let mut meta = simple_meta("t");
        meta.primary_key = vec!["id".to_string()];
        meta.record_count = 3;
        catalog.create_table(meta).unwrap();

        catalog.use_database("b").unwrap();
        assert!(matches!(
            catalog.table("t"),
            Err(CatalogError::TableNotFound(_))
        ));

        catalog.use_database("a").unwrap();
        let loaded = catalog.table("t").unwrap();
        assert_eq!(loaded.primary_key, vec!["id".to_string()]);
        assert_eq!(loaded.record_count, 3);
    }

    #[test]
    fn test_drop_current_database_clears_state() {
        let (_temp, mut catalog) = setup();
        catalog.create_database("db").unwrap();
        catalog.use_database("db").unwrap();
        catalog.create_table(simple_meta("t")).unwrap();

        catalog.drop_database("db").unwrap();
        assert_eq!(catalog.current_database(), None);
        assert!(matches!(
            catalog.table("t"),
            Err(CatalogError::NoDatabaseSelected)
        ));
        assert!(!catalog.database_path("db").exists());
    }

    #[test]
    fn test_save_table_rewrites_meta() {
        let (temp, mut catalog) = setup();
        catalog.create_database("db").unwrap();
        catalog.use_database("db").unwrap();
        catalog.create_table(simple_meta("t")).unwrap();

        catalog.table_mut("t").unwrap().record_count = 42;
        catalog.save_table("t").unwrap();

        let text = std::fs::read_to_string(temp.path().join("db/t.meta")).unwrap();
        assert!(text.contains("RECORD_COUNT 42"));
    }
}

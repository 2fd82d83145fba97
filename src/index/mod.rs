//! Secondary-index layer: per-(table, column) B+ trees and their lifecycle.

mod btree;
mod error;
mod key;

pub use btree::{BPlusTree, BTREE_MAGIC, NODE_HEADER_WORDS, RangeScan};
pub use error::{IndexError, IndexResult};
pub use key::{IndexKey, KeyKind, key_word_footprint};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::file::BufferManager;
use crate::record::RecordId;

/// Owns the open B+ tree per (table, column) of the current database and
/// dispatches typed operations to them.
pub struct IndexRegistry {
    buffer_manager: Arc<Mutex<BufferManager>>,
    open_indexes: HashMap<(String, String), BPlusTree>,
}

impl IndexRegistry {
    pub fn new(buffer_manager: Arc<Mutex<BufferManager>>) -> Self {
        Self {
            buffer_manager,
            open_indexes: HashMap::new(),
        }
    }

    fn index_file_path(db_path: &str, table: &str, column: &str) -> String {
        format!("{}/{}_{}.idx", db_path, table, column)
    }

    fn lock_buffers(&self) -> MutexGuard<'_, BufferManager> {
        match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tree(&self, table: &str, column: &str) -> IndexResult<&BPlusTree> {
        self.open_indexes
            .get(&(table.to_string(), column.to_string()))
            .ok_or_else(|| IndexError::IndexNotOpen(format!("{}.{}", table, column)))
    }

    pub fn is_open(&self, table: &str, column: &str) -> bool {
        self.open_indexes
            .contains_key(&(table.to_string(), column.to_string()))
    }

    pub fn create_index(
        &mut self,
        db_path: &str,
        table: &str,
        column: &str,
        kind: KeyKind,
        key_len: usize,
    ) -> IndexResult<()> {
        let path = Self::index_file_path(db_path, table, column);
        if std::path::Path::new(&path).exists() {
            return Err(IndexError::IndexAlreadyExists(path));
        }

        let mut buffer_manager = self.lock_buffers();
        let tree = BPlusTree::create(&mut buffer_manager, &path, kind, key_len)?;
        drop(buffer_manager);

        self.open_indexes
            .insert((table.to_string(), column.to_string()), tree);
        Ok(())
    }

    pub fn open_index(&mut self, db_path: &str, table: &str, column: &str) -> IndexResult<()> {
        let map_key = (table.to_string(), column.to_string());
        if self.open_indexes.contains_key(&map_key) {
            return Ok(());
        }

        let path = Self::index_file_path(db_path, table, column);
        if !std::path::Path::new(&path).exists() {
            return Err(IndexError::IndexNotFound(path));
        }

        let mut buffer_manager = self.lock_buffers();
        let tree = BPlusTree::open(&mut buffer_manager, &path)?;
        drop(buffer_manager);

        self.open_indexes.insert(map_key, tree);
        Ok(())
    }

    /// Forget the open tree; its pages persist in the shared buffer pool
    /// until flushed.
    pub fn close_index(&mut self, table: &str, column: &str) {
        self.open_indexes
            .remove(&(table.to_string(), column.to_string()));
    }

    pub fn close_all(&mut self) {
        self.open_indexes.clear();
    }

    /// Close and delete the index file, discarding its cached pages.
    pub fn drop_index(&mut self, db_path: &str, table: &str, column: &str) -> IndexResult<()> {
        self.close_index(table, column);

        let path = Self::index_file_path(db_path, table, column);
        if !std::path::Path::new(&path).exists() {
            return Err(IndexError::IndexNotFound(path));
        }
        let mut buffer_manager = self.lock_buffers();
        buffer_manager.discard_and_remove(&path)?;
        Ok(())
    }

    /// Insert an entry. Returns false on a duplicate key (unique trees).
    pub fn insert(
        &mut self,
        table: &str,
        column: &str,
        key: IndexKey,
        rid: RecordId,
    ) -> IndexResult<bool> {
        let map_key = (table.to_string(), column.to_string());
        let tree = self
            .open_indexes
            .get_mut(&map_key)
            .ok_or_else(|| IndexError::IndexNotOpen(format!("{}.{}", table, column)))?;
        let mut buffer_manager = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tree.insert(&mut buffer_manager, key, rid)
    }

    pub fn delete(&mut self, table: &str, column: &str, key: &IndexKey) -> IndexResult<bool> {
        let map_key = (table.to_string(), column.to_string());
        let tree = self
            .open_indexes
            .get_mut(&map_key)
            .ok_or_else(|| IndexError::IndexNotOpen(format!("{}.{}", table, column)))?;
        let mut buffer_manager = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tree.delete(&mut buffer_manager, key)
    }

    pub fn search(&self, table: &str, column: &str, key: &IndexKey) -> IndexResult<Option<RecordId>> {
        let tree = self.tree(table, column)?;
        let mut buffer_manager = self.lock_buffers();
        tree.search(&mut buffer_manager, key)
    }

    /// Streaming bounded range scan.
    pub fn range(
        &self,
        table: &str,
        column: &str,
        lower: Option<IndexKey>,
        upper: Option<IndexKey>,
        include_lower: bool,
        include_upper: bool,
    ) -> IndexResult<RangeScan> {
        let tree = self.tree(table, column)?;
        Ok(tree.range(
            self.buffer_manager.clone(),
            lower,
            upper,
            include_lower,
            include_upper,
        ))
    }

    pub fn key_shape(&self, table: &str, column: &str) -> IndexResult<(KeyKind, usize)> {
        let tree = self.tree(table, column)?;
        Ok((tree.key_kind(), tree.key_len()))
    }

    /// Advisory entry count from the tree header.
    pub fn entry_count(&self, table: &str, column: &str) -> IndexResult<i64> {
        let tree = self.tree(table, column)?;
        let mut buffer_manager = self.lock_buffers();
        tree.entry_count(&mut buffer_manager)
    }
}

mod error;
mod page;
mod row;
mod schema;
mod store;
mod value;

pub use error::{RecordError, RecordResult};
pub use page::{MAX_PAYLOAD_BYTES, RecordPage};
pub use row::{decode_row, encode_row};
pub use schema::{ColumnDef, NULL_BITMAP_BYTES, TableSchema};
pub use store::{FIRST_RECORD_PAGE, RecordScanIter, RecordStore};
pub use value::{DataType, Value, truncate_to_capacity};

use crate::file::BufferManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Physical identifier of one record: the page it was first addressed at
/// and the per-table monotonic slot id. Both components are non-negative
/// for a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_no: i32,
    pub slot_id: i32,
}

impl RecordId {
    pub fn new(page_no: i32, slot_id: i32) -> Self {
        Self { page_no, slot_id }
    }

    pub fn is_valid(&self) -> bool {
        self.page_no >= 0 && self.slot_id >= 0
    }
}

/// Keeps the open `RecordStore` per table of the current database.
pub struct RecordManager {
    buffer_manager: Arc<Mutex<BufferManager>>,
    open_stores: HashMap<String, RecordStore>,
}

impl RecordManager {
    pub fn new(buffer_manager: Arc<Mutex<BufferManager>>) -> Self {
        Self {
            buffer_manager,
            open_stores: HashMap::new(),
        }
    }

    pub fn create_table(&mut self, table_name: &str, path: &str) -> RecordResult<()> {
        let mut buffer_manager = self.lock_buffers();
        let store = RecordStore::create(&mut buffer_manager, path)?;
        drop(buffer_manager);
        self.open_stores.insert(table_name.to_string(), store);
        Ok(())
    }

    pub fn open_table(&mut self, table_name: &str, path: &str) -> RecordResult<()> {
        if self.open_stores.contains_key(table_name) {
            return Ok(());
        }
        let mut buffer_manager = self.lock_buffers();
        let store = RecordStore::open(&mut buffer_manager, path)?;
        drop(buffer_manager);
        self.open_stores.insert(table_name.to_string(), store);
        Ok(())
    }

    pub fn close_table(&mut self, table_name: &str) {
        self.open_stores.remove(table_name);
    }

    pub fn close_all(&mut self) {
        self.open_stores.clear();
    }

    pub fn insert(&mut self, table_name: &str, slot_id: i32, payload: &[u8]) -> RecordResult<()> {
        let store = Self::store_mut(&mut self.open_stores, table_name)?;
        let mut buffer_manager = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.insert(&mut buffer_manager, slot_id, payload)
    }

    pub fn delete(&mut self, table_name: &str, slot_id: i32) -> RecordResult<()> {
        let store = Self::store_mut(&mut self.open_stores, table_name)?;
        let mut buffer_manager = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.delete(&mut buffer_manager, slot_id)
    }

    pub fn update(&mut self, table_name: &str, slot_id: i32, payload: &[u8]) -> RecordResult<()> {
        let store = Self::store_mut(&mut self.open_stores, table_name)?;
        let mut buffer_manager = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.update(&mut buffer_manager, slot_id, payload)
    }

    pub fn get(&mut self, table_name: &str, slot_id: i32) -> RecordResult<Vec<u8>> {
        let store = Self::store_mut(&mut self.open_stores, table_name)?;
        let mut buffer_manager = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.get(&mut buffer_manager, slot_id)
    }

    /// Streaming scan over a table's live records.
    pub fn scan_iter(&self, table_name: &str) -> RecordResult<RecordScanIter> {
        let store = self
            .open_stores
            .get(table_name)
            .ok_or_else(|| RecordError::TableNotOpen(table_name.to_string()))?;
        Ok(store.scan_iter(self.buffer_manager.clone()))
    }

    fn store_mut<'a>(
        stores: &'a mut HashMap<String, RecordStore>,
        table_name: &str,
    ) -> RecordResult<&'a mut RecordStore> {
        stores
            .get_mut(table_name)
            .ok_or_else(|| RecordError::TableNotOpen(table_name.to_string()))
    }

    fn lock_buffers(&self) -> std::sync::MutexGuard<'_, BufferManager> {
        match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

//! The catalog: resolves table ids to heap files and schemas.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StorageError};
use crate::heap_file::HeapFile;
use crate::schema::Schema;
use crate::TableId;

/// Registry of the tables the page store can touch. The store and heap
/// files never hardcode table metadata; every table id goes through here.
#[derive(Default)]
pub struct Catalog {
    tables: Mutex<HashMap<TableId, Arc<HeapFile>>>,
    next_table_id: AtomicU32,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vends a fresh table id for callers creating a new heap file.
    pub fn next_table_id(&self) -> TableId {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a heap file under its table id, replacing any previous
    /// registration for that id.
    pub fn register(&self, file: Arc<HeapFile>) {
        let table = file.table_id();
        log::debug!("registering table {table}");
        self.tables.lock().insert(table, file);
    }

    pub fn heap_file(&self, table: TableId) -> Result<Arc<HeapFile>> {
        self.tables
            .lock()
            .get(&table)
            .cloned()
            .ok_or(StorageError::UnknownTable(table))
    }

    pub fn schema(&self, table: TableId) -> Result<Arc<Schema>> {
        Ok(self.heap_file(table)?.schema().clone())
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.lock().keys().copied().collect()
    }
}

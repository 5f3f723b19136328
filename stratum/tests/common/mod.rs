#![allow(dead_code)]

use std::sync::Arc;

use stratum::catalog::Catalog;
use stratum::heap_file::HeapFile;
use stratum::schema::{FieldDef, FieldType, Schema};
use stratum::tuple::{Tuple, Value};
use stratum::wal::WalWriter;
use stratum::{PageStore, StoreConfig, TableId};
use tempfile::{tempdir, TempDir};

/// One table's worth of storage plus the page store in front of it. The
/// temp directory lives as long as the fixture.
pub struct Fixture {
    pub store: PageStore,
    pub catalog: Arc<Catalog>,
    pub wal: Arc<WalWriter>,
    pub table: TableId,
    pub schema: Arc<Schema>,
    dir: TempDir,
}

impl Fixture {
    /// Registers another table with the shared schema and returns its id.
    pub fn add_table(&self) -> TableId {
        let table = self.catalog.next_table_id();
        let file = HeapFile::open(
            self.dir.path().join(format!("table_{table}.dat")),
            table,
            self.schema.clone(),
            self.store.config().page_size,
        )
        .unwrap();
        self.catalog.register(Arc::new(file));
        table
    }

    /// Inserts `tuples` rows into `table`, each in its own committed
    /// transaction, so no page stays dirty afterwards.
    pub fn seed(&self, table: TableId, tuples: i32) {
        for i in 0..tuples {
            let tx = stratum::TransactionId::fresh();
            self.store.insert(tx, table, tuple(&self.schema, i)).unwrap();
            self.store.commit(tx).unwrap();
        }
    }
}

/// The `(int, text(8))` schema used across the scenario tests.
pub fn int_text_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        FieldDef::named(FieldType::Int, "id"),
        FieldDef::named(FieldType::Text(8), "label"),
    ]))
}

pub fn setup(config: StoreConfig) -> Fixture {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(Catalog::new());
    let schema = int_text_schema();

    let table = catalog.next_table_id();
    let file = HeapFile::open(
        dir.path().join(format!("table_{table}.dat")),
        table,
        schema.clone(),
        config.page_size,
    )
    .unwrap();
    catalog.register(Arc::new(file));

    let wal = Arc::new(WalWriter::open(dir.path().join("store.wal")).unwrap());
    let store = PageStore::new(config, catalog.clone(), wal.clone());

    Fixture { store, catalog, wal, table, schema, dir }
}

pub fn setup_default() -> Fixture {
    setup(StoreConfig::default())
}

/// A config with short lock backoff so contention tests finish quickly.
pub fn fast_backoff(mut config: StoreConfig) -> StoreConfig {
    config.backoff_min_ms = 1;
    config.backoff_max_ms = 5;
    config
}

pub fn tuple(schema: &Arc<Schema>, i: i32) -> Tuple {
    Tuple::new(schema.clone(), vec![Value::Int(i), Value::Text(format!("v{i}"))]).unwrap()
}

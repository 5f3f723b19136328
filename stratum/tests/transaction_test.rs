use stratum::tuple::Value;
use stratum::{failpoint, PageId, Permission, StorageError, StoreConfig, TransactionId};

mod common;

fn small_page_config(capacity: usize) -> StoreConfig {
    StoreConfig { page_size: 128, capacity, ..common::fast_backoff(StoreConfig::default()) }
}

#[test]
fn cache_never_exceeds_capacity() {
    let fx = common::setup(small_page_config(4));
    fx.seed(fx.table, 42); // 6 pages of 7 tuples

    let tx = TransactionId::fresh();
    for page_no in 0..6 {
        fx.store
            .fetch(tx, PageId::new(fx.table, page_no), Permission::ReadOnly)
            .unwrap();
        assert!(fx.store.cached_page_count() <= 4);
    }
    assert_eq!(fx.store.cached_page_count(), 4);
}

#[test]
fn eviction_skips_dirty_pages() {
    let fx = common::setup(small_page_config(2));
    fx.seed(fx.table, 20); // 3 pages; page 2 still has a free slot

    // Dirty page 2 under an uncommitted transaction. The first-fit scan
    // leaves the writer holding exclusive locks on all three pages.
    let writer = TransactionId::fresh();
    fx.store
        .insert(writer, fx.table, common::tuple(&fx.schema, 100))
        .unwrap();

    // Cycling through the clean pages forces evictions; the dirty page
    // must survive them all.
    for page_no in [0, 1, 0, 1] {
        fx.store
            .fetch(writer, PageId::new(fx.table, page_no), Permission::ReadOnly)
            .unwrap();
    }

    let page = fx
        .store
        .fetch(writer, PageId::new(fx.table, 2), Permission::ReadOnly)
        .unwrap();
    assert!(
        page.tuples().any(|t| t.value(0) == &Value::Int(100)),
        "uncommitted mutation was evicted"
    );
}

#[test]
fn fetch_fails_when_every_cached_page_is_dirty() {
    let fx = common::setup(small_page_config(1));
    fx.seed(fx.table, 3);
    let other_table = fx.add_table();
    fx.seed(other_table, 1);

    let writer = TransactionId::fresh();
    fx.store
        .insert(writer, fx.table, common::tuple(&fx.schema, 100))
        .unwrap();
    assert_eq!(fx.store.cached_page_count(), 1);

    // The reader touches a different table, so no lock conflict: it runs
    // straight into the all-dirty cache.
    let reader = TransactionId::fresh();
    let err = fx
        .store
        .fetch(reader, PageId::new(other_table, 0), Permission::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, StorageError::CacheExhausted { capacity: 1 }));

    // Once the writer commits, the same fetch goes through.
    fx.store.commit(writer).unwrap();
    fx.store
        .fetch(reader, PageId::new(other_table, 0), Permission::ReadOnly)
        .unwrap();
}

#[test]
fn commit_makes_changes_durable_and_drops_locks() {
    let fx = common::setup_default();
    let tx = TransactionId::fresh();
    let rid = fx
        .store
        .insert(tx, fx.table, common::tuple(&fx.schema, 7))
        .unwrap();
    assert!(fx.store.holds_lock(tx, rid.page));

    fx.store.commit(tx).unwrap();
    assert!(!fx.store.holds_lock(tx, rid.page));
    assert!(fx.store.lock_manager().held_pages(tx).is_empty());

    // One update record was logged for the single dirtied page.
    assert_eq!(fx.wal.record_count(), 1);

    // Reread straight from the heap file, bypassing the cache.
    let file = fx.catalog.heap_file(fx.table).unwrap();
    let page = file.read_page(rid.page).unwrap();
    assert!(page.is_slot_used(rid.slot as usize));
    assert!(page.tuples().any(|t| t.value(0) == &Value::Int(7)));
}

#[test]
fn abort_discards_uncommitted_changes_and_drops_locks() {
    let fx = common::setup_default();
    fx.seed(fx.table, 5);

    let tx = TransactionId::fresh();
    let rid = fx
        .store
        .insert(tx, fx.table, common::tuple(&fx.schema, 100))
        .unwrap();
    fx.store.abort(tx);
    assert!(!fx.store.holds_lock(tx, rid.page));
    assert!(fx.store.lock_manager().held_pages(tx).is_empty());

    // A later transaction sees only the committed five tuples.
    let reader = TransactionId::fresh();
    let scanned: Vec<_> = fx
        .store
        .scan(reader, fx.table)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(scanned.len(), 5);
    assert!(scanned.iter().all(|t| t.value(0) != &Value::Int(100)));
}

#[test]
fn flush_tx_writes_back_but_keeps_locks() {
    let fx = common::setup_default();
    let tx = TransactionId::fresh();
    let rid = fx
        .store
        .insert(tx, fx.table, common::tuple(&fx.schema, 1))
        .unwrap();

    fx.store.flush_tx(tx).unwrap();
    assert!(fx.store.holds_lock(tx, rid.page));

    let file = fx.catalog.heap_file(fx.table).unwrap();
    let page = file.read_page(rid.page).unwrap();
    assert!(page.is_slot_used(rid.slot as usize));

    fx.store.commit(tx).unwrap();
}

#[test]
fn discard_drops_a_dirty_copy_without_writing_it() {
    let fx = common::setup_default();
    fx.seed(fx.table, 3);

    let tx = TransactionId::fresh();
    let rid = fx
        .store
        .insert(tx, fx.table, common::tuple(&fx.schema, 100))
        .unwrap();
    fx.store.discard(rid.page);

    // The next fetch rereads the clean on-disk version.
    let page = fx.store.fetch(tx, rid.page, Permission::ReadOnly).unwrap();
    assert!(page.tuples().all(|t| t.value(0) != &Value::Int(100)));
}

#[test]
fn read_io_failures_propagate_without_retry() {
    let fx = common::setup_default();
    fx.seed(fx.table, 1);
    // Push the page out of the cache so the fetch has to hit the file.
    fx.store.discard(PageId::new(fx.table, 0));

    failpoint::enable("heap_file::read_page");
    let tx = TransactionId::fresh();
    let err = fx
        .store
        .fetch(tx, PageId::new(fx.table, 0), Permission::ReadOnly)
        .unwrap_err();
    failpoint::clear();
    assert!(matches!(err, StorageError::Io(_)));
}

#[test]
fn reading_past_the_end_of_the_file_is_corrupt() {
    let fx = common::setup_default();
    let file = fx.catalog.heap_file(fx.table).unwrap();
    let err = file.read_page(PageId::new(fx.table, 9)).unwrap_err();
    assert!(matches!(err, StorageError::CorruptPage { .. }));
}

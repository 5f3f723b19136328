//! The page store: a capacity-bounded page cache coordinating locks,
//! miss-fill from heap files, eviction, dirty tracking, and transaction
//! commit/abort.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::catalog::Catalog;
use crate::error::{Result, StorageError};
use crate::heap_file::HeapScan;
use crate::heap_page::HeapPage;
use crate::lock_manager::{LockManager, LockMode};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::wal::LogWriter;
use crate::{PageId, RecordId, TableId, DEFAULT_PAGE_SIZE};

/// Access level a transaction requests when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    fn lock_mode(self) -> LockMode {
        match self {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Configuration for the page store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bytes per page. Changing this from the default only makes sense in
    /// tests; it must match the page size of every registered heap file.
    pub page_size: usize,
    /// Maximum number of cached pages.
    pub capacity: usize,
    /// Estimated cost of one page read, consumed by cost-based planners
    /// sitting above the store.
    pub io_cost_per_page: f64,
    /// Bounds for the randomized sleep between lock-acquisition attempts.
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            capacity: 50,
            io_cost_per_page: 1.0,
            backoff_min_ms: 200,
            backoff_max_ms: 500,
        }
    }
}

/// Lock acquisition attempts beyond the first before giving up.
const LOCK_RETRIES: usize = 1;

struct CacheEntry {
    page: HeapPage,
    /// The transaction that dirtied the page, if any. Dirty pages are
    /// pinned in cache until their owner commits or aborts.
    dirty: Option<TransactionId>,
}

/// Cache bookkeeping: the page map plus an explicit recency list whose
/// front is the least recently used page. Both structures mutate together
/// under the store's one cache mutex.
struct PageCache {
    capacity: usize,
    entries: std::collections::HashMap<PageId, CacheEntry>,
    recency: std::collections::VecDeque<PageId>,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: std::collections::HashMap::new(),
            recency: std::collections::VecDeque::new(),
        }
    }

    fn touch(&mut self, pid: PageId) {
        if let Some(pos) = self.recency.iter().position(|&p| p == pid) {
            self.recency.remove(pos);
        }
        self.recency.push_back(pid);
    }

    fn remove(&mut self, pid: PageId) {
        self.entries.remove(&pid);
        self.recency.retain(|&p| p != pid);
    }

    /// Evicts the least recently used clean page. Dirty pages are never
    /// victims; if nothing is clean the cache is exhausted.
    fn evict_one(&mut self) -> Result<()> {
        let victim = self
            .recency
            .iter()
            .copied()
            .find(|pid| self.entries.get(pid).is_some_and(|e| e.dirty.is_none()));
        match victim {
            Some(pid) => {
                log::debug!("evicting page {pid}");
                self.remove(pid);
                Ok(())
            }
            None => Err(StorageError::CacheExhausted { capacity: self.capacity }),
        }
    }

    /// Inserts or replaces an entry, evicting first if a new key would
    /// push the cache past capacity.
    fn put(&mut self, pid: PageId, entry: CacheEntry) -> Result<()> {
        if self.entries.contains_key(&pid) {
            self.entries.insert(pid, entry);
            self.touch(pid);
        } else {
            if self.entries.len() >= self.capacity {
                self.evict_one()?;
            }
            self.entries.insert(pid, entry);
            self.recency.push_back(pid);
        }
        Ok(())
    }
}

/// Mediates every page access between query operators and heap files.
///
/// All state shared between transaction threads lives behind two locks:
/// the lock manager's table mutex and the cache mutex, each taken for
/// whole check-then-set steps so no other thread observes a half-applied
/// transition.
pub struct PageStore {
    config: StoreConfig,
    catalog: Arc<Catalog>,
    log: Arc<dyn LogWriter>,
    locks: LockManager,
    cache: Mutex<PageCache>,
}

impl PageStore {
    pub fn new(config: StoreConfig, catalog: Arc<Catalog>, log: Arc<dyn LogWriter>) -> Self {
        let cache = Mutex::new(PageCache::new(config.capacity));
        Self {
            config,
            catalog,
            log,
            locks: LockManager::new(),
            cache,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Number of pages currently cached. Never exceeds the configured
    /// capacity.
    pub fn cached_page_count(&self) -> usize {
        self.cache.lock().entries.len()
    }

    /// Fetches a page for `tx` under the given permission, taking the
    /// matching lock first.
    ///
    /// Lock acquisition sleeps a randomized interval and retries a bounded
    /// number of times; if the lock still cannot be taken the call fails
    /// with a possible-deadlock error and the caller must abort `tx`.
    /// This times out lock waits instead of detecting cycles, so it can
    /// falsely abort (or repeatedly back off) under heavy contention.
    ///
    /// The returned page is a copy of the cached state at fetch time;
    /// mutations flow back through [`insert`] and [`delete`].
    ///
    /// [`insert`]: PageStore::insert
    /// [`delete`]: PageStore::delete
    pub fn fetch(&self, tx: TransactionId, pid: PageId, perm: Permission) -> Result<HeapPage> {
        let mode = perm.lock_mode();
        let mut attempts = 0;
        while !self.locks.try_acquire(pid, tx, mode) {
            if attempts == LOCK_RETRIES {
                log::warn!("tx {tx} may be deadlocked on page {pid}, giving up");
                return Err(StorageError::PossibleDeadlock { tx, page: pid });
            }
            attempts += 1;
            let wait = rand::rng()
                .random_range(self.config.backoff_min_ms..=self.config.backoff_max_ms);
            log::debug!("tx {tx} waiting {wait}ms for page {pid}");
            thread::sleep(Duration::from_millis(wait));
        }

        let mut cache = self.cache.lock();

        // Hit: refresh recency and hand out a copy.
        if let Some(entry) = cache.entries.get(&pid) {
            let page = entry.page.clone();
            cache.touch(pid);
            return Ok(page);
        }

        // Miss: make room, then fill from the heap file. The entry starts
        // clean regardless of the requested permission.
        if cache.entries.len() >= cache.capacity {
            cache.evict_one()?;
        }
        log::debug!("cache miss for page {pid}, reading from heap file");
        let file = self.catalog.heap_file(pid.table)?;
        let page = file.read_page(pid)?;
        cache.entries.insert(pid, CacheEntry { page: page.clone(), dirty: None });
        cache.recency.push_back(pid);
        Ok(page)
    }

    /// Adds a tuple to `table` on behalf of `tx` and returns its record
    /// id. Every page the heap file dirtied is marked dirty for `tx` and
    /// (re)cached, replacing any older copy, so subsequent fetches observe
    /// the mutation.
    pub fn insert(&self, tx: TransactionId, table: TableId, tuple: Tuple) -> Result<RecordId> {
        let file = self.catalog.heap_file(table)?;
        let (pages, rid) = file.insert_tuple(self, tx, tuple)?;
        self.absorb_dirty(tx, pages)?;
        log::debug!("tx {tx} inserted tuple at {rid}");
        Ok(rid)
    }

    /// Removes the tuple named by its record id on behalf of `tx`. On
    /// success the tuple's record id is cleared; it no longer has a
    /// storage location.
    pub fn delete(&self, tx: TransactionId, tuple: &mut Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(StorageError::TupleNotFound)?;
        let file = self.catalog.heap_file(rid.page.table)?;
        let pages = file.delete_tuple(self, tx, tuple)?;
        self.absorb_dirty(tx, pages)?;
        tuple.clear_record_id();
        log::debug!("tx {tx} deleted tuple at {rid}");
        Ok(())
    }

    fn absorb_dirty(&self, tx: TransactionId, pages: Vec<HeapPage>) -> Result<()> {
        let mut cache = self.cache.lock();
        for page in pages {
            let pid = page.id();
            cache.put(pid, CacheEntry { page, dirty: Some(tx) })?;
        }
        Ok(())
    }

    /// A scan over every tuple of `table`, fetching pages through this
    /// store under read permission as the iterator advances.
    pub fn scan(&self, tx: TransactionId, table: TableId) -> Result<HeapScan<'_>> {
        let file = self.catalog.heap_file(table)?;
        Ok(HeapScan::new(file, self, tx))
    }

    pub fn holds_lock(&self, tx: TransactionId, pid: PageId) -> bool {
        self.locks.holds(pid, tx)
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Commits `tx`: every page it dirtied is logged (before and after
    /// image), the log is forced, the page is written to its heap file and
    /// becomes the new before-image, and finally all of `tx`'s locks are
    /// released.
    pub fn commit(&self, tx: TransactionId) -> Result<()> {
        log::debug!("committing tx {tx}");
        {
            let mut cache = self.cache.lock();
            for pid in self.locks.held_pages(tx) {
                let Some(entry) = cache.entries.get_mut(&pid) else {
                    continue;
                };
                if entry.dirty != Some(tx) {
                    continue;
                }
                self.write_back(tx, &entry.page)?;
                entry.dirty = None;
                entry.page.set_before_image();
            }
        }
        self.locks.release_all(tx);
        Ok(())
    }

    /// Aborts `tx`: its dirty cached pages are discarded outright, so the
    /// next fetch rereads the clean on-disk version, then all of its locks
    /// are released. Safe to call whatever state the transaction is in.
    pub fn abort(&self, tx: TransactionId) {
        log::debug!("aborting tx {tx}");
        {
            let mut cache = self.cache.lock();
            for pid in self.locks.held_pages(tx) {
                let dirtied_here = cache
                    .entries
                    .get(&pid)
                    .is_some_and(|e| e.dirty == Some(tx));
                if dirtied_here {
                    log::trace!("discarding dirty copy of page {pid}");
                    cache.remove(pid);
                }
            }
        }
        self.locks.release_all(tx);
    }

    /// Writes back `tx`'s dirty pages without releasing its locks or
    /// refreshing before-images. Exposed for explicit checkpointing.
    pub fn flush_tx(&self, tx: TransactionId) -> Result<()> {
        let mut cache = self.cache.lock();
        for pid in self.locks.held_pages(tx) {
            let Some(entry) = cache.entries.get_mut(&pid) else {
                continue;
            };
            if entry.dirty != Some(tx) {
                continue;
            }
            self.write_back(tx, &entry.page)?;
            entry.dirty = None;
        }
        Ok(())
    }

    /// Writes every dirty cached page to storage, whoever owns it. This
    /// publishes uncommitted data, so it is only for shutdown and tests.
    pub fn flush_all(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        let pids: Vec<PageId> = cache.entries.keys().copied().collect();
        for pid in pids {
            let Some(entry) = cache.entries.get_mut(&pid) else {
                continue;
            };
            if let Some(owner) = entry.dirty {
                self.write_back(owner, &entry.page)?;
                entry.dirty = None;
            }
        }
        Ok(())
    }

    /// Drops a page from the cache without writing it back, e.g. after a
    /// storage reorganization invalidates the cached copy.
    pub fn discard(&self, pid: PageId) {
        self.cache.lock().remove(pid);
    }

    /// Log-then-write for one page: the update record carrying the
    /// before/after images is forced to the log before the page itself
    /// reaches the heap file.
    fn write_back(&self, owner: TransactionId, page: &HeapPage) -> Result<()> {
        let after = page.serialize();
        self.log.log_write(owner, page.before_image(), &after)?;
        self.log.force()?;
        let file = self.catalog.heap_file(page.id().table)?;
        file.write_page(page)?;
        log::trace!("flushed page {} for tx {owner}", page.id());
        Ok(())
    }
}

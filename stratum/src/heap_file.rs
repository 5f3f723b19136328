//! Heap files: one append-only file of fixed-size slotted pages per table.
//!
//! The file handles page-granular random I/O itself; tuple-level insert and
//! delete go back through the page store so that every touched page is
//! fetched under the proper lock and lands in the cache.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StorageError};
use crate::failpoint;
use crate::heap_page::HeapPage;
use crate::page_store::{PageStore, Permission};
use crate::schema::Schema;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::{PageId, RecordId, TableId};

/// On-disk backing store for one table.
pub struct HeapFile {
    table: TableId,
    schema: Arc<Schema>,
    page_size: usize,
    file: Mutex<File>,
}

impl HeapFile {
    /// Opens the table's backing file, creating it and its parent
    /// directories if they don't exist.
    pub fn open<P: AsRef<Path>>(
        path: P,
        table: TableId,
        schema: Arc<Schema>,
        page_size: usize,
    ) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path_ref)?;
        log::debug!(
            "opened heap file for table {table} at {:?} ({} bytes)",
            path_ref,
            file.metadata()?.len()
        );
        Ok(Self { table, schema, page_size, file: Mutex::new(file) })
    }

    pub fn table_id(&self) -> TableId {
        self.table
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the file, derived from its current length.
    pub fn page_count(&self) -> Result<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok(len.div_ceil(self.page_size as u64) as u32)
    }

    /// Reads and parses exactly one page. A short read (truncated file) or
    /// a parse failure surfaces as a corrupt-page error.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        failpoint::maybe_fail("heap_file::read_page")?;
        let mut data = vec![0; self.page_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(pid.page_no as u64 * self.page_size as u64))?;
            file.read_exact(&mut data).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    StorageError::CorruptPage {
                        page: pid,
                        reason: "file ends before page does".to_string(),
                    }
                } else {
                    StorageError::Io(e)
                }
            })?;
        }
        HeapPage::parse(pid, self.schema.clone(), self.page_size, &data)
    }

    /// Writes the page's serialized form at its offset. The target must be
    /// an existing page or the first page past the end; sparse writes are
    /// refused.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        failpoint::maybe_fail("heap_file::write_page")?;
        let page_no = page.id().page_no;
        if page_no > self.page_count()? {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "page {} is past the end of table {}'s heap file",
                page_no, self.table
            ))));
        }
        let data = page.serialize();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_no as u64 * self.page_size as u64))?;
        file.write_all(&data)?;
        file.sync_all()?;
        log::trace!("wrote page {}", page.id());
        Ok(())
    }

    /// Places `tuple` on the first page with a free slot, fetching each
    /// candidate through the store under write permission. If every page is
    /// full, a fresh page is appended with the tuple in slot 0. Returns the
    /// pages dirtied by the operation and the tuple's new record id.
    pub fn insert_tuple(
        &self,
        store: &PageStore,
        tx: TransactionId,
        tuple: Tuple,
    ) -> Result<(Vec<HeapPage>, RecordId)> {
        let count = self.page_count()?;
        for page_no in 0..count {
            let pid = PageId::new(self.table, page_no);
            let mut page = store.fetch(tx, pid, Permission::ReadWrite)?;
            if page.empty_slot_count() > 0 {
                let rid = page.insert_tuple(tuple)?;
                return Ok((vec![page], rid));
            }
        }

        // Every existing page is full: extend the file with a new page
        // carrying the tuple, then fetch it so the transaction holds its
        // lock like any other dirtied page.
        let pid = PageId::new(self.table, count);
        let mut page = HeapPage::empty(pid, self.schema.clone(), self.page_size);
        let rid = page.insert_tuple(tuple)?;
        self.write_page(&page)?;
        store.fetch(tx, pid, Permission::ReadWrite)?;
        log::debug!("tx {tx} extended table {} with page {pid}", self.table);
        Ok((vec![page], rid))
    }

    /// Clears the slot named by the tuple's record id. Fails with
    /// not-found if the tuple was never placed, and with not-on-page if
    /// the slot is empty or holds different contents.
    pub fn delete_tuple(
        &self,
        store: &PageStore,
        tx: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<HeapPage>> {
        let rid = tuple.record_id().ok_or(StorageError::TupleNotFound)?;
        if rid.page.table != self.table {
            return Err(StorageError::TupleNotFound);
        }
        let mut page = store.fetch(tx, rid.page, Permission::ReadWrite)?;
        page.delete_tuple(tuple)?;
        Ok(vec![page])
    }
}

/// A lazy scan over every tuple in one heap file, in page order then slot
/// order. Pages are fetched through the store under read permission as the
/// scan reaches them, so the scan sees pages as they are at fetch time
/// rather than a point-in-time snapshot. Restartable from the first page
/// via [`rewind`].
///
/// [`rewind`]: HeapScan::rewind
pub struct HeapScan<'a> {
    file: Arc<HeapFile>,
    store: &'a PageStore,
    tx: TransactionId,
    next_page: u32,
    current: std::vec::IntoIter<Tuple>,
    done: bool,
}

impl<'a> HeapScan<'a> {
    pub fn new(file: Arc<HeapFile>, store: &'a PageStore, tx: TransactionId) -> Self {
        Self {
            file,
            store,
            tx,
            next_page: 0,
            current: Vec::new().into_iter(),
            done: false,
        }
    }

    /// Restarts the scan from page 0. Already-yielded tuples will be
    /// yielded again.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.current = Vec::new().into_iter();
        self.done = false;
    }
}

impl Iterator for HeapScan<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(tuple) = self.current.next() {
                return Some(Ok(tuple));
            }
            let count = match self.file.page_count() {
                Ok(count) => count,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if self.next_page >= count {
                self.done = true;
                return None;
            }
            let pid = PageId::new(self.file.table_id(), self.next_page);
            self.next_page += 1;
            match self.store.fetch(self.tx, pid, Permission::ReadOnly) {
                Ok(page) => {
                    self.current = page.tuples().cloned().collect::<Vec<_>>().into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

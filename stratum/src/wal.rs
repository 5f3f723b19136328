//! The write-ahead log writer.
//!
//! The page store logs a (before-image, after-image) record for every dirty
//! page at commit and forces the log before the page itself is written, so
//! a crash between the two leaves enough on disk to reconstruct the
//! pre-commit page. Log replay itself is out of scope here; only the
//! logging discipline lives in this crate.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::error::Result;
use crate::failpoint;
use crate::transaction::TransactionId;

pub type Lsn = u64;

/// The logging collaborator the page store commits through.
pub trait LogWriter: Send + Sync {
    /// Appends an update record for one page. The record is not durable
    /// until the next [`force`].
    ///
    /// [`force`]: LogWriter::force
    fn log_write(&self, tx: TransactionId, before: &[u8], after: &[u8]) -> Result<Lsn>;

    /// Synchronous durability barrier: returns once every appended record
    /// has reached stable storage.
    fn force(&self) -> Result<()>;
}

/// Fixed part of every log record: total length, owning transaction, and a
/// CRC over the images.
const RECORD_HEADER_SIZE: usize = 4 + 8 + 4;

struct WalInner {
    file: File,
    next_lsn: Lsn,
    record_count: u64,
}

/// File-backed [`LogWriter`]. Records are appended with a checksummed
/// binary header; `force` maps to `fsync`.
pub struct WalWriter {
    inner: Mutex<WalInner>,
}

impl WalWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let next_lsn = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(WalInner { file, next_lsn, record_count: 0 }),
        })
    }

    /// Records appended since this writer was opened.
    pub fn record_count(&self) -> u64 {
        self.inner.lock().record_count
    }
}

impl LogWriter for WalWriter {
    fn log_write(&self, tx: TransactionId, before: &[u8], after: &[u8]) -> Result<Lsn> {
        failpoint::maybe_fail("wal::log_write")?;

        let mut payload = Vec::with_capacity(8 + before.len() + after.len());
        payload.extend_from_slice(&(before.len() as u32).to_be_bytes());
        payload.extend_from_slice(before);
        payload.extend_from_slice(&(after.len() as u32).to_be_bytes());
        payload.extend_from_slice(after);

        let total_len = (RECORD_HEADER_SIZE + payload.len()) as u32;
        let mut hasher = Hasher::new();
        hasher.update(&total_len.to_be_bytes());
        hasher.update(&tx.id().to_be_bytes());
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        inner.file.write_all(&total_len.to_be_bytes())?;
        inner.file.write_all(&tx.id().to_be_bytes())?;
        inner.file.write_all(&crc.to_be_bytes())?;
        inner.file.write_all(&payload)?;
        inner.next_lsn += total_len as u64;
        inner.record_count += 1;
        log::trace!("logged update record for tx {tx} at lsn {lsn} ({total_len} bytes)");
        Ok(lsn)
    }

    fn force(&self) -> Result<()> {
        failpoint::maybe_fail("wal::force")?;
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

//! Per-page shared/exclusive lock table.
//!
//! Acquisition is a non-blocking test-and-set: a request that conflicts
//! with current holders is refused, never queued. All waiting, backoff, and
//! timeout policy lives in the page store.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::transaction::TransactionId;
use crate::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Lock bookkeeping: per-page holder maps plus a reverse index from
/// transaction to held pages. Every compound check-then-set mutates under
/// the one mutex in [`LockManager`], so grants and releases are atomic
/// steps.
#[derive(Debug, Default)]
struct LockTables {
    shared: HashMap<PageId, HashSet<TransactionId>>,
    exclusive: HashMap<PageId, TransactionId>,
    held: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTables {
    fn record_held(&mut self, page: PageId, tx: TransactionId) {
        self.held.entry(tx).or_default().insert(page);
    }

    fn release_one(&mut self, page: PageId, tx: TransactionId) {
        if self.exclusive.get(&page) == Some(&tx) {
            self.exclusive.remove(&page);
            log::trace!("tx {tx} released exclusive lock on page {page}");
        }
        if let Some(holders) = self.shared.get_mut(&page) {
            if holders.remove(&tx) {
                log::trace!("tx {tx} released shared lock on page {page}");
            }
            if holders.is_empty() {
                self.shared.remove(&page);
            }
        }
        if let Some(pages) = self.held.get_mut(&tx) {
            pages.remove(&page);
            if pages.is_empty() {
                self.held.remove(&tx);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct LockManager {
    tables: Mutex<LockTables>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take `page` for `tx` in `mode`. Returns `false` if the
    /// request conflicts with other holders; the caller decides whether to
    /// retry. Re-requests by a transaction that already holds a
    /// sufficient lock succeed, and a sole shared holder may upgrade to
    /// exclusive in place.
    pub fn try_acquire(&self, page: PageId, tx: TransactionId, mode: LockMode) -> bool {
        let mut tables = self.tables.lock();
        match mode {
            LockMode::Shared => {
                if let Some(&holder) = tables.exclusive.get(&page) {
                    // An exclusive holder subsumes its own shared request.
                    if holder != tx {
                        log::debug!("tx {tx} denied shared lock on page {page}: exclusively held by tx {holder}");
                    }
                    return holder == tx;
                }
                tables.shared.entry(page).or_default().insert(tx);
                tables.record_held(page, tx);
                log::trace!("tx {tx} acquired shared lock on page {page}");
                true
            }
            LockMode::Exclusive => {
                if let Some(&holder) = tables.exclusive.get(&page) {
                    if holder != tx {
                        log::debug!("tx {tx} denied exclusive lock on page {page}: exclusively held by tx {holder}");
                    }
                    return holder == tx;
                }
                let upgradeable = match tables.shared.get(&page) {
                    None => true,
                    Some(holders) => holders.len() == 1 && holders.contains(&tx),
                };
                if !upgradeable {
                    log::debug!("tx {tx} denied exclusive lock on page {page}: shared by others");
                    return false;
                }
                tables.shared.remove(&page);
                tables.exclusive.insert(page, tx);
                tables.record_held(page, tx);
                log::trace!("tx {tx} acquired exclusive lock on page {page}");
                true
            }
        }
    }

    /// Drops whatever hold `tx` has on `page`. No-op if nothing is held.
    pub fn release(&self, page: PageId, tx: TransactionId) {
        self.tables.lock().release_one(page, tx);
    }

    /// Releases every page held by `tx`.
    pub fn release_all(&self, tx: TransactionId) {
        let mut tables = self.tables.lock();
        if let Some(pages) = tables.held.remove(&tx) {
            log::debug!("tx {tx} releasing {} locks", pages.len());
            for page in pages {
                tables.release_one(page, tx);
            }
        }
    }

    /// True iff `tx` holds `page` in either mode.
    pub fn holds(&self, page: PageId, tx: TransactionId) -> bool {
        let tables = self.tables.lock();
        tables.exclusive.get(&page) == Some(&tx)
            || tables.shared.get(&page).is_some_and(|h| h.contains(&tx))
    }

    /// The pages currently locked by `tx`, in no particular order. Commit
    /// and abort walk this to know what to flush or reload.
    pub fn held_pages(&self, tx: TransactionId) -> Vec<PageId> {
        self.tables
            .lock()
            .held
            .get(&tx)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(no: u32) -> PageId {
        PageId::new(1, no)
    }

    #[test]
    fn shared_locks_coexist() {
        let lm = LockManager::new();
        let (a, b) = (TransactionId::fresh(), TransactionId::fresh());
        assert!(lm.try_acquire(page(0), a, LockMode::Shared));
        assert!(lm.try_acquire(page(0), b, LockMode::Shared));
        assert!(lm.holds(page(0), a));
        assert!(lm.holds(page(0), b));
    }

    #[test]
    fn exclusive_excludes_everyone_else() {
        let lm = LockManager::new();
        let (a, b) = (TransactionId::fresh(), TransactionId::fresh());
        assert!(lm.try_acquire(page(0), a, LockMode::Exclusive));
        assert!(!lm.try_acquire(page(0), b, LockMode::Exclusive));
        assert!(!lm.try_acquire(page(0), b, LockMode::Shared));
        // Re-requests by the holder succeed in either mode.
        assert!(lm.try_acquire(page(0), a, LockMode::Exclusive));
        assert!(lm.try_acquire(page(0), a, LockMode::Shared));
    }

    #[test]
    fn sole_shared_holder_upgrades_in_place() {
        let lm = LockManager::new();
        let (a, b) = (TransactionId::fresh(), TransactionId::fresh());
        assert!(lm.try_acquire(page(0), a, LockMode::Shared));
        assert!(lm.try_acquire(page(0), a, LockMode::Exclusive));
        assert!(!lm.try_acquire(page(0), b, LockMode::Shared));
    }

    #[test]
    fn upgrade_is_refused_while_shared_by_others() {
        let lm = LockManager::new();
        let (a, b) = (TransactionId::fresh(), TransactionId::fresh());
        assert!(lm.try_acquire(page(0), a, LockMode::Shared));
        assert!(lm.try_acquire(page(0), b, LockMode::Shared));
        assert!(!lm.try_acquire(page(0), a, LockMode::Exclusive));

        lm.release(page(0), b);
        assert!(lm.try_acquire(page(0), a, LockMode::Exclusive));
    }

    #[test]
    fn release_all_clears_the_reverse_index() {
        let lm = LockManager::new();
        let tx = TransactionId::fresh();
        assert!(lm.try_acquire(page(0), tx, LockMode::Shared));
        assert!(lm.try_acquire(page(1), tx, LockMode::Exclusive));
        assert_eq!(lm.held_pages(tx).len(), 2);

        lm.release_all(tx);
        assert!(lm.held_pages(tx).is_empty());
        assert!(!lm.holds(page(0), tx));
        assert!(!lm.holds(page(1), tx));

        let other = TransactionId::fresh();
        assert!(lm.try_acquire(page(1), other, LockMode::Exclusive));
    }

    #[test]
    fn release_of_unheld_page_is_a_no_op() {
        let lm = LockManager::new();
        let tx = TransactionId::fresh();
        lm.release(page(7), tx);
        assert!(!lm.holds(page(7), tx));
    }
}

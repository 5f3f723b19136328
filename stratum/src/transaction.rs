//! Transaction identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque token identifying one transaction. Every call to [`fresh`]
/// returns a process-wide unique id.
///
/// [`fresh`]: TransactionId::fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn fresh() -> Self {
        Self(NEXT_TX_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// src/core/counter.rs

//! A mutex-guarded use counter backing [`MemberPtr`] reference counting.
//!
//! The data store's ingestion loop scans these counters concurrently with
//! handle clones and drops happening on other tasks; the lock keeps the
//! read-modify-write cycles of both sides from interleaving.
//!
//! [`MemberPtr`]: crate::core::handle::MemberPtr

use parking_lot::Mutex;
use std::fmt;

#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: Mutex<usize>,
}

impl AtomicCounter {
    pub fn new(value: usize) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn increase(&self) {
        *self.value.lock() += 1;
    }

    /// Decrements the counter, saturating at zero.
    pub fn decrease(&self) {
        let mut value = self.value.lock();
        *value = value.saturating_sub(1);
    }

    pub fn get(&self) -> usize {
        *self.value.lock()
    }

    pub fn non_zero(&self) -> bool {
        *self.value.lock() > 0
    }
}

impl fmt::Display for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

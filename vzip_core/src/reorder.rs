use std::collections::BTreeMap;

use crate::error::{Result, VzipError};

/// Re-sequences items that arrive out of order back into index order.
///
/// Items wait in a `BTreeMap` until the next expected index arrives, at which
/// point [`pop_ready`](Self::pop_ready) releases it and any contiguous
/// successors.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u32,
    total: u32,
    pending: BTreeMap<u32, T>,
    max_pending: usize,
}

impl<T> ReorderBuffer<T> {
    /// A buffer expecting indices `0..total`, holding at most `max_pending`
    /// early arrivals.
    pub fn new(total: u32, max_pending: usize) -> Self {
        Self {
            next: 0,
            total,
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Park `item` under `index`.
    ///
    /// # Errors
    /// Stale, duplicate and out-of-range indices are invariant violations, as
    /// is growing past `max_pending`.
    pub fn insert(&mut self, index: u32, item: T) -> Result<()> {
        if index >= self.total {
            return Err(VzipError::internal(format!(
                "block index {} outside 0..{}",
                index, self.total
            )));
        }
        if index < self.next || self.pending.contains_key(&index) {
            return Err(VzipError::internal(format!("duplicate block index {index}")));
        }
        if index != self.next && self.pending.len() >= self.max_pending {
            return Err(VzipError::internal(format!(
                "reorder buffer holds {} blocks waiting for block {}",
                self.pending.len(),
                self.next
            )));
        }
        self.pending.insert(index, item);
        Ok(())
    }

    /// Take the item for the next expected index, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    pub fn next_expected(&self) -> u32 {
        self.next
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Every index in `0..total` has been released.
    pub fn is_complete(&self) -> bool {
        self.next == self.total && self.pending.is_empty()
    }
}

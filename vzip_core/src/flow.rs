use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, VzipError};

#[derive(Debug, Default)]
struct Counters {
    read: u64,
    written: u64,
    peak: u64,
    aborted: bool,
}

impl Counters {
    #[inline]
    fn in_flight(&self) -> u64 {
        self.read.saturating_sub(self.written)
    }
}

/// Credit gate between the reader and the writer.
///
/// The reader calls [`admit_read`](Self::admit_read) before producing each
/// block and the writer calls [`admit_write`](Self::admit_write) once the
/// block has been handed to the target's buffered writer. The reader is held back while `max_in_flight` blocks are
/// read but not yet written, which bounds the number of blocks in memory
/// regardless of how fast the workers are.
#[derive(Debug)]
pub struct FlowController {
    counters: Mutex<Counters>,
    credit: Condvar,
    max_in_flight: u64,
}

impl FlowController {
    pub fn new(max_in_flight: usize) -> Result<Self> {
        if max_in_flight == 0 {
            return Err(VzipError::config("max_in_flight must be positive"));
        }
        Ok(Self {
            counters: Mutex::new(Counters::default()),
            credit: Condvar::new(),
            max_in_flight: max_in_flight as u64,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for a free slot, then count one more block as read.
    ///
    /// Returns [`VzipError::Cancelled`] if the controller is aborted while
    /// (or before) waiting.
    pub fn admit_read(&self) -> Result<()> {
        let mut counters = self.lock();
        while !counters.aborted && counters.in_flight() >= self.max_in_flight {
            counters = self
                .credit
                .wait(counters)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if counters.aborted {
            return Err(VzipError::Cancelled);
        }
        counters.read += 1;
        counters.peak = counters.peak.max(counters.in_flight());
        Ok(())
    }

    /// Count one block as written and release its slot.
    ///
    /// "Written" means the block left the pipeline's memory and was handed to
    /// the target's output buffer. Durability is established once per run, when
    /// the writer flushes and syncs the target at the end.
    pub fn admit_write(&self) {
        let mut counters = self.lock();
        counters.written += 1;
        drop(counters);
        self.credit.notify_all();
    }

    /// Wake a blocked reader and make every later `admit_read` fail.
    pub fn abort(&self) {
        self.lock().aborted = true;
        self.credit.notify_all();
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight as usize
    }

    pub fn read_count(&self) -> u64 {
        self.lock().read
    }

    pub fn write_count(&self) -> u64 {
        self.lock().written
    }

    pub fn in_flight(&self) -> u64 {
        self.lock().in_flight()
    }

    /// Highest `read - written` observed right after an admitted read.
    pub fn peak_in_flight(&self) -> u64 {
        self.lock().peak
    }
}

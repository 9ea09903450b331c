use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Open/closed state of a [`HandoffQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Producers may still enqueue; consumers wait when the queue is empty.
    Open,
    /// No more items will be produced; consumers drain what is left.
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    state: QueueState,
}

/// Blocking FIFO used to hand blocks from one pipeline stage to the next.
///
/// `enqueue` never blocks. `try_dequeue` blocks until an item arrives or the
/// queue is closed and empty; only the latter returns `None`, and once it
/// does every later call returns `None` too. Closing keeps the backlog, so
/// consumers always drain everything that was enqueued.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                state: QueueState::Open,
            }),
            ready: Condvar::new(),
        }
    }

    // A consumer that panicked while holding the lock leaves the deque intact,
    // so poisoning is not a reason to stop handing out items.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `item` and wake one waiting consumer.
    pub fn enqueue(&self, item: T) {
        self.lock().items.push_back(item);
        self.ready.notify_one();
    }

    /// Take the next item, blocking while the queue is open and empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.state == QueueState::Closed {
                return None;
            }
            inner = self
                .ready
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Signal that no more items will be enqueued. Idempotent.
    pub fn close(&self) {
        self.lock().state = QueueState::Closed;
        self.ready.notify_all();
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == QueueState::Closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Blocking FIFO handing captured events from the hook thread to the
//! coalescing consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A closeable blocking queue. `pop` parks the calling thread until an item
/// arrives or the queue is closed; after close, remaining items still drain
/// before `pop` starts returning `None`.
pub struct BlockingQueue<T> {
    inner: Mutex<QueueState<T>>,
    available: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item. Pushing to a closed queue drops the item.
    pub fn push(&self, item: T) {
        let mut state = self.inner.lock().unwrap();
        if state.closed {
            return;
        }
        state.items.push_back(item);
        self.available.notify_one();
    }

    /// Removes the oldest item, blocking while the queue is empty and open.
    /// Returns `None` only once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Closes the queue, waking every blocked `pop`. Items already queued
    /// remain poppable. Closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.inner.lock().unwrap();
        state.closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

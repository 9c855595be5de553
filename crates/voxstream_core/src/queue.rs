//! # Work Queue
//!
//! Unbounded multi-producer / single-consumer queue that hands upload
//! requests to the background loader thread.
//!
//! ```text
//!   Parser thread ──┐
//!   Render thread ──┼──> [Mutex<VecDeque>] ──> pop_blocking() ──> Loader thread
//!   Any thread    ──┘        + Condvar            (single consumer)
//! ```
//!
//! Requests arrive at scene-load rate, not per frame, so there is no
//! capacity limit and no backpressure. Stopping the queue discards whatever
//! is still queued: the consumer sees `None` on its next pop even if items
//! were pending.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Queue contents plus the stop flag, guarded by one lock so a stop can
/// never race with a pop.
struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Thread-safe FIFO work queue.
///
/// # Example
///
/// ```rust
/// use voxstream_core::WorkQueue;
///
/// let queue = WorkQueue::new();
/// queue.push(7u32).unwrap();
/// assert_eq!(queue.pop_blocking(), Some(7));
///
/// queue.stop();
/// assert_eq!(queue.pop_blocking(), None);
/// ```
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signalled on push and on stop.
    available: Condvar,
}

impl<T> WorkQueue<T> {
    /// Creates an empty, running queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item. Callable from any thread.
    ///
    /// # Errors
    ///
    /// Returns the item back if the queue has been stopped.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until an item is available or the queue is stopped.
    ///
    /// Consumer thread only. Returns `None` once the queue is stopped,
    /// regardless of how many items were still queued.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    /// Pops an item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.stopped {
            return None;
        }
        state.items.pop_front()
    }

    /// Stops the queue and wakes the consumer.
    ///
    /// Queued items are dropped. Returns how many were discarded.
    pub fn stop(&self) -> usize {
        let mut state = self.state.lock();
        state.stopped = true;
        let discarded = state.items.len();
        state.items.clear();
        drop(state);
        self.available.notify_all();
        discarded
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

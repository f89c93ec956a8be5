//! Bounded two-way pool of reusable instances.
//!
//! A [`TwoWayPool`] holds a fixed number of pre-allocated items split between
//! an "empty" queue (writable) and a "filled" queue (ready to consume). A
//! producer takes empty items, fills them and returns them filled; a consumer
//! takes filled items, processes them and returns them empty.
//!
//! This gives backpressure without allocation: if the consumer stalls, the
//! producer blocks on [`TwoWayPool::take_empty`] until the bounded wait runs
//! out and reports [`Take::Exhausted`].
//!
//! Invariant: `empty + filled + checked_out == capacity` at all times.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SensingError};

/// Outcome of a blocking take.
#[derive(Debug)]
pub enum Take<T> {
    /// An item was obtained. The caller now owns it exclusively.
    Item(T),
    /// The bounded wait elapsed without an item becoming available.
    Exhausted,
    /// The pool was cancelled while waiting.
    Cancelled,
}

impl<T> Take<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Take::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Take::Exhausted)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Take::Cancelled)
    }
}

#[derive(Debug)]
struct Queues<T> {
    empty: VecDeque<T>,
    filled: VecDeque<T>,
    checked_out: usize,
    cancelled: bool,
}

/// Fixed-capacity pool with an empty side and a filled side.
///
/// Internally synchronized; share it between threads with `Arc`.
#[derive(Debug)]
pub struct TwoWayPool<T> {
    name: &'static str,
    capacity: usize,
    queues: Mutex<Queues<T>>,
    empty_available: Condvar,
    filled_available: Condvar,
}

impl<T> TwoWayPool<T> {
    /// Create a pool and pre-populate the empty side with `capacity` items
    /// built by `factory`.
    pub fn new<F>(name: &'static str, capacity: usize, mut factory: F) -> Self
    where
        F: FnMut() -> T,
    {
        let empty: VecDeque<T> = (0..capacity).map(|_| factory()).collect();
        Self {
            name,
            capacity,
            queues: Mutex::new(Queues {
                empty,
                filled: VecDeque::with_capacity(capacity),
                checked_out: 0,
                cancelled: false,
            }),
            empty_available: Condvar::new(),
            filled_available: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take an empty item, waiting at most `timeout`.
    pub fn take_empty(&self, timeout: Duration) -> Take<T> {
        self.take(timeout, true)
    }

    /// Take the oldest filled item, waiting at most `timeout`.
    pub fn take_filled(&self, timeout: Duration) -> Take<T> {
        self.take(timeout, false)
    }

    fn take(&self, timeout: Duration, from_empty: bool) -> Take<T> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if queues.cancelled {
                return Take::Cancelled;
            }
            let popped = if from_empty {
                queues.empty.pop_front()
            } else {
                queues.filled.pop_front()
            };
            if let Some(item) = popped {
                queues.checked_out += 1;
                return Take::Item(item);
            }

            let condvar = if from_empty {
                &self.empty_available
            } else {
                &self.filled_available
            };
            if condvar.wait_until(&mut queues, deadline).timed_out() {
                // One last look: a return may have raced the timeout.
                let popped = if from_empty {
                    queues.empty.pop_front()
                } else {
                    queues.filled.pop_front()
                };
                return match popped {
                    Some(item) => {
                        queues.checked_out += 1;
                        Take::Item(item)
                    }
                    None if queues.cancelled => Take::Cancelled,
                    None => Take::Exhausted,
                };
            }
        }
    }

    /// Take the oldest filled item without waiting.
    pub fn try_take_filled(&self) -> Option<T> {
        let mut queues = self.queues.lock();
        let item = queues.filled.pop_front();
        if item.is_some() {
            queues.checked_out += 1;
        }
        item
    }

    /// Hand an item back to the empty side.
    pub fn return_empty(&self, item: T) -> Result<()> {
        let mut queues = self.queues.lock();
        self.check_return(&queues)?;
        queues.checked_out -= 1;
        queues.empty.push_back(item);
        drop(queues);
        self.empty_available.notify_one();
        Ok(())
    }

    /// Hand an item to the filled side (FIFO).
    pub fn return_filled(&self, item: T) -> Result<()> {
        let mut queues = self.queues.lock();
        self.check_return(&queues)?;
        queues.checked_out -= 1;
        queues.filled.push_back(item);
        drop(queues);
        self.filled_available.notify_one();
        Ok(())
    }

    fn check_return(&self, queues: &Queues<T>) -> Result<()> {
        if queues.checked_out == 0 {
            return Err(SensingError::PoolInvariant {
                pool: self.name,
                empty: queues.empty.len() + 1,
                filled: queues.filled.len(),
                checked_out: 0,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Inspect the oldest filled item without removing it.
    pub fn peek_filled<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let queues = self.queues.lock();
        queues.filled.front().map(f)
    }

    /// Visit every filled item, oldest first, without removing any.
    pub fn for_each_filled(&self, mut f: impl FnMut(&T)) {
        let queues = self.queues.lock();
        for item in queues.filled.iter() {
            f(item);
        }
    }

    /// Number of filled items waiting to be consumed.
    pub fn pending_filled_count(&self) -> usize {
        self.queues.lock().filled.len()
    }

    /// Number of items on the empty side.
    pub fn empty_count(&self) -> usize {
        self.queues.lock().empty.len()
    }

    /// Number of items currently held by callers.
    pub fn checked_out_count(&self) -> usize {
        self.queues.lock().checked_out
    }

    /// Move every filled item back to the empty side.
    ///
    /// Returns how many items were recycled.
    pub fn drain_filled_to_empty(&self) -> usize {
        let mut queues = self.queues.lock();
        let moved = queues.filled.len();
        while let Some(item) = queues.filled.pop_front() {
            queues.empty.push_back(item);
        }
        drop(queues);
        if moved > 0 {
            self.empty_available.notify_all();
        }
        moved
    }

    /// Verify `empty + filled + checked_out == capacity`.
    pub fn check_invariant(&self) -> Result<()> {
        let queues = self.queues.lock();
        let total = queues.empty.len() + queues.filled.len() + queues.checked_out;
        if total != self.capacity {
            return Err(SensingError::PoolInvariant {
                pool: self.name,
                empty: queues.empty.len(),
                filled: queues.filled.len(),
                checked_out: queues.checked_out,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Wake every waiter with [`Take::Cancelled`]; later takes fail fast.
    pub fn cancel(&self) {
        self.queues.lock().cancelled = true;
        self.empty_available.notify_all();
        self.filled_available.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.queues.lock().cancelled
    }
}

//! Bounded FIFO passing signing jobs from workers to drudgers.
//!
//! Producers block while the queue is full; consumers block until at least
//! one item is queued. Consumers are woken once the queue reaches its
//! threshold, or explicitly through [`HandoffQueue::kick`] when a producer
//! has finished a batch smaller than the threshold.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::core::error::QueueError;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer, multi-consumer hand-off queue.
///
/// Invariant: the number of queued items never exceeds the capacity, and
/// items leave in insertion order.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    threshold_reached: Condvar,
    not_full: Condvar,
    capacity: usize,
    threshold: usize,
}

impl<T> HandoffQueue<T> {
    /// Create a queue holding at most `capacity` items that wakes consumers
    /// once `threshold` items are queued. Both are clamped to at least 1.
    #[must_use]
    pub fn new(capacity: usize, threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            threshold_reached: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            threshold: threshold.clamp(1, capacity),
        }
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// `QueueError::Closed` if the queue is closed before or while waiting.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.items.push_back(item);
        if state.items.len() >= self.threshold {
            self.threshold_reached.notify_all();
        }
        Ok(())
    }

    /// Take the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once `exit` is set or the queue is closed. Items still
    /// queued at that point are left for [`HandoffQueue::drain`].
    pub fn pop(&self, exit: &AtomicBool) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if exit.load(Ordering::Acquire) || state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            self.threshold_reached.wait(&mut state);
        }
    }

    /// Take the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Wake consumers even though fewer than `threshold` items are queued.
    pub fn kick(&self) {
        let state = self.state.lock();
        if !state.items.is_empty() {
            self.threshold_reached.notify_all();
        }
    }

    /// Close the queue and wake every producer and consumer.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.threshold_reached.notify_all();
        self.not_full.notify_all();
    }

    /// Wake every sleeping consumer so it re-checks its exit flag.
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.threshold_reached.notify_all();
        self.not_full.notify_all();
    }

    /// Remove and return everything still queued.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let items = state.items.drain(..).collect();
        self.not_full.notify_all();
        items
    }
}

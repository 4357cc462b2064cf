use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{QueueError, lock};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded blocking MPMC deque.
///
/// Producers block while the queue is full, consumers block while it is
/// empty. `close` clears pending items and wakes every waiter with
/// [`QueueError::Closed`]; the queue is unusable afterwards.
///
/// Same-direction operations are FIFO: items popped from the front come out
/// in the order they were pushed to the back.
pub struct BlockingQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append an item, blocking while the queue is at capacity.
    pub fn push_back(&self, item: T) -> Result<(), QueueError> {
        self.push_with(item, VecDeque::push_back)
    }

    /// Prepend an item, blocking while the queue is at capacity.
    pub fn push_front(&self, item: T) -> Result<(), QueueError> {
        self.push_with(item, VecDeque::push_front)
    }

    fn push_with(&self, item: T, insert: fn(&mut VecDeque<T>, T)) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        while state.items.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        insert(&mut state.items, item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the front item, blocking while the queue is empty.
    pub fn pop_front(&self) -> Result<T, QueueError> {
        let mut state = lock(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            state = self.not_empty.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`pop_front`](Self::pop_front) but gives up after `timeout`.
    pub fn pop_front_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::TimedOut);
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        lock(&self.state).items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all pending items without closing.
    pub fn clear(&self) {
        lock(&self.state).items.clear();
        self.not_full.notify_all();
    }

    /// Wake one blocked consumer without pushing anything.
    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    /// Drop pending items, mark the queue closed and wake every waiter.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            state.items.clear();
            state.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

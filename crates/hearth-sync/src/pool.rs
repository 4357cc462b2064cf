use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::{Arc, Condvar, Mutex},
};

use crate::{PoolError, lock};

struct PoolState<H> {
    free: VecDeque<H>,
    closed: bool,
}

struct Shared<H> {
    state: Mutex<PoolState<H>>,
    freed: Condvar,
}

/// Fixed-size pool of opaque handles behind a counting semaphore.
///
/// [`acquire`](Self::acquire) blocks until a handle is free and returns a
/// scoped [`Lease`] that gives it back on drop, whatever the exit path.
/// The conservation invariant `free + leased = size` holds until
/// [`close`](Self::close), which drops the free handles and fails all
/// waiters.
pub struct HandlePool<H> {
    shared: Arc<Shared<H>>,
    size: usize,
}

impl<H> Clone for HandlePool<H> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), size: self.size }
    }
}

impl<H> HandlePool<H> {
    /// Build `size` handles eagerly; any factory failure aborts the open.
    pub fn open<F, E>(size: usize, mut factory: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<H, E>,
    {
        assert!(size > 0, "pool needs at least one handle");
        let mut free = VecDeque::with_capacity(size);
        for i in 0..size {
            free.push_back(factory(i)?);
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState { free, closed: false }),
                freed: Condvar::new(),
            }),
            size,
        })
    }

    /// Block until a handle is free.
    pub fn acquire(&self) -> Result<Lease<H>, PoolError> {
        let mut state = lock(&self.shared.state);
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(handle) = state.free.pop_front() {
                return Ok(Lease { handle: Some(handle), shared: Arc::clone(&self.shared) });
            }
            state = self.shared.freed.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn try_acquire(&self) -> Result<Lease<H>, PoolError> {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(PoolError::Closed);
        }
        match state.free.pop_front() {
            Some(handle) => Ok(Lease { handle: Some(handle), shared: Arc::clone(&self.shared) }),
            None => Err(PoolError::Exhausted),
        }
    }

    pub fn free_count(&self) -> usize {
        lock(&self.shared.state).free.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Drop all free handles and fail current and future waiters.
    /// Outstanding leases return their handles to the closed pool, which
    /// drops them.
    pub fn close(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.closed = true;
            state.free.clear();
        }
        self.shared.freed.notify_all();
    }
}

/// Scoped lease on a pooled handle.
pub struct Lease<H> {
    handle: Option<H>,
    shared: Arc<Shared<H>>,
}

impl<H> Deref for Lease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.handle.as_ref().expect("lease already released")
    }
}

impl<H> DerefMut for Lease<H> {
    fn deref_mut(&mut self) -> &mut H {
        self.handle.as_mut().expect("lease already released")
    }
}

impl<H> Drop for Lease<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let mut state = lock(&self.shared.state);
            if !state.closed {
                state.free.push_back(handle);
                drop(state);
                self.shared.freed.notify_one();
            }
        }
    }
}

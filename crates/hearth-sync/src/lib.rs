mod error;
mod pool;
mod queue;
mod worker;

pub use error::{PoolError, QueueError};
pub use pool::{HandlePool, Lease};
pub use queue::BlockingQueue;
pub use worker::WorkerPool;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

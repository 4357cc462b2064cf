use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
    #[error("timed out waiting for an item")]
    TimedOut,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool closed")]
    Closed,
    #[error("no free handle")]
    Exhausted,
}

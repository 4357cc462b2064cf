mod conn;
mod file;
mod handler;
mod request;
mod response;
mod store;

pub use conn::Connection;
pub use file::FileMap;
pub use handler::{Handled, Handler};
pub use request::{ParseResult, Request};
pub use response::Response;
pub use store::{MemoryStore, UserPool, UserStore};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("malformed request head")]
    BadHead,
    #[error("invalid Content-Length")]
    BadContentLength,
    #[error("request body larger than {0} bytes")]
    BodyTooLarge(usize),
}

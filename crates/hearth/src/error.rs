use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// Startup failures. Nothing else crosses the reactor loop boundary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("static root {0:?} is not a readable directory")]
    Root(PathBuf),
    #[error("couldn't set up the listening socket: {0}")]
    Socket(#[source] io::Error),
    #[error("couldn't bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("couldn't listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
    #[error("couldn't set up the event poller: {0}")]
    Poller(#[source] io::Error),
}

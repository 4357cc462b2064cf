use std::path::PathBuf;

use hearth_log::Level;
use serde::Deserialize;
use thiserror::Error;

/// Hard cap on simultaneously served connections.
pub const MAX_FD: usize = 65_536;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port {0} outside the unprivileged range 1024..=65535")]
    Port(u16),
    #[error("trigger mode {0} not in 0..=3")]
    TrigMode(u8),
    #[error("worker thread count must be positive")]
    Threads,
    #[error("connection limit {0} not in 1..={MAX_FD}")]
    MaxConns(usize),
    #[error("database pool size must be positive")]
    DbPoolSize,
}

/// Everything the server needs to start. The CLI (or an embedding program)
/// produces one of these; `Server::new` consumes it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// 0 = LT listen & LT conn, 1 = LT & ET, 2 = ET & LT, 3 = ET & ET.
    pub trig_mode: u8,
    /// Idle connection timeout in milliseconds; 0 disables.
    pub timeout_ms: u64,
    /// `SO_LINGER{1s}` on the listening socket.
    pub opt_linger: bool,
    pub thread_num: usize,
    /// Static content root, resolved to an absolute path at startup.
    pub root: PathBuf,
    pub max_conns: usize,
    pub db: Option<DbConfig>,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 1316,
            trig_mode: 3,
            timeout_ms: 60_000,
            opt_linger: false,
            thread_num: 6,
            root: PathBuf::from("resources"),
            max_conns: MAX_FD,
            db: None,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < 1024 {
            return Err(ConfigError::Port(self.port));
        }
        if self.trig_mode > 3 {
            return Err(ConfigError::TrigMode(self.trig_mode));
        }
        if self.thread_num == 0 {
            return Err(ConfigError::Threads);
        }
        if self.max_conns == 0 || self.max_conns > MAX_FD {
            return Err(ConfigError::MaxConns(self.max_conns));
        }
        if let Some(db) = &self.db {
            if db.pool_size == 0 {
                return Err(ConfigError::DbPoolSize);
            }
        }
        Ok(())
    }

    pub fn listen_edge_triggered(&self) -> bool {
        matches!(self.trig_mode, 2 | 3)
    }

    pub fn conn_edge_triggered(&self) -> bool {
        matches!(self.trig_mode, 1 | 3)
    }
}

/// Connection parameters for a backing user database. The engine only pools
/// opaque handles; whatever client library an embedder wires in reads these.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub level: Level,
    pub dir: PathBuf,
    pub suffix: String,
    /// 0 writes synchronously; anything else bounds the async queue.
    pub queue_cap: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: Level::Info,
            dir: PathBuf::from("logs"),
            suffix: ".log".to_string(),
            queue_cap: 1024,
        }
    }
}

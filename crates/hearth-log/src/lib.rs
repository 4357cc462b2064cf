mod sink;

pub use sink::{LogSink, RollingFile, VecSink};

use std::{
    fmt, io,
    path::PathBuf,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
};

use hearth_sync::BlockingQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sink::locked;

/// Line-count threshold at which the rolling file sink starts a new file.
pub const DEFAULT_MAX_LINES: usize = 50_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "[DEBUG]",
            Level::Info => "[INFO] ",
            Level::Warn => "[WARN] ",
            Level::Error => "[ERROR]",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warn,
            _ => Level::Error,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown log level {0:?}, expected debug|info|warn|error")]
pub struct UnknownLevel(String);

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

enum Mode {
    Off,
    Sync(Mutex<Box<dyn LogSink>>),
    Async { queue: Arc<BlockingQueue<String>>, drainer: Mutex<Option<JoinHandle<()>>> },
}

struct Core {
    level: AtomicU8,
    mode: Mode,
}

impl Core {
    fn shutdown(&self) {
        match &self.mode {
            Mode::Off => {}
            Mode::Sync(sink) => {
                let _ = locked(sink).flush();
            }
            Mode::Async { queue, drainer } => {
                // give the drainer a chance to catch up; close() discards
                while !queue.is_empty() {
                    queue.flush();
                    thread::yield_now();
                }
                queue.close();
                if let Some(handle) = locked(drainer).take() {
                    let _ = handle.join();
                }
            }
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cheap-to-clone logging handle.
///
/// Records are fully formatted at the call site
/// (`YYYY-MM-DD HH:MM:SS.ffffff [TAG]  message`) and either written
/// synchronously under the sink lock or handed to a bounded queue drained by
/// a dedicated thread. Records below the configured level are elided before
/// formatting.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
}

impl Logger {
    /// A handle that drops everything.
    pub fn disabled() -> Self {
        Self { core: Arc::new(Core { level: AtomicU8::new(Level::Error as u8), mode: Mode::Off }) }
    }

    /// Log to date-and-line-count rotated files under `dir`.
    pub fn to_dir(
        level: Level,
        dir: impl Into<PathBuf>,
        suffix: &str,
        queue_cap: usize,
    ) -> io::Result<Self> {
        let sink = RollingFile::create(dir.into(), suffix.to_string(), DEFAULT_MAX_LINES)?;
        Ok(Self::with_sink(level, Box::new(sink), queue_cap))
    }

    /// Log through an arbitrary sink. `queue_cap > 0` spawns the drainer
    /// thread; `0` writes synchronously.
    pub fn with_sink(level: Level, sink: Box<dyn LogSink>, queue_cap: usize) -> Self {
        let mode = if queue_cap == 0 {
            Mode::Sync(Mutex::new(sink))
        } else {
            let queue = Arc::new(BlockingQueue::new(queue_cap));
            let drain_queue = Arc::clone(&queue);
            let drainer = thread::Builder::new()
                .name("log-drain".to_string())
                .spawn(move || drain_loop(&drain_queue, sink))
                .expect("spawn log drainer");
            Mode::Async { queue, drainer: Mutex::new(Some(drainer)) }
        };
        Self { core: Arc::new(Core { level: AtomicU8::new(level as u8), mode }) }
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.core.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: Level) {
        self.core.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn enabled_for(&self, level: Level) -> bool {
        !matches!(self.core.mode, Mode::Off) && level >= self.level()
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled_for(level) {
            return;
        }
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let line = format!("{stamp} {}  {args}", level.tag());
        match &self.core.mode {
            Mode::Off => {}
            Mode::Sync(sink) => {
                let mut sink = locked(sink);
                let _ = sink.write_line(&line).and_then(|()| sink.flush());
            }
            Mode::Async { queue, .. } => {
                let _ = queue.push_back(line);
            }
        }
    }

    /// Flush pending records, stop the drainer and release the sink.
    /// Further writes are dropped.
    pub fn close(&self) {
        self.core.shutdown();
    }
}

fn drain_loop(queue: &BlockingQueue<String>, mut sink: Box<dyn LogSink>) {
    loop {
        match queue.pop_front() {
            Ok(line) => {
                let _ = sink.write_line(&line);
                if queue.is_empty() {
                    let _ = sink.flush();
                }
            }
            Err(_) => {
                let _ = sink.flush();
                return;
            }
        }
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::Level::Debug, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::Level::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::Level::Warn, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::Level::Error, format_args!($($arg)+))
    };
}

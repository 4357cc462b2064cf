use std::{error::Error, fs, path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use hearth::{
    config::ServerConfig,
    http::{MemoryStore, UserPool},
    server::Server,
};
use hearth_log::{Level, Logger, log_error};

#[derive(Debug, Parser)]
#[command(name = "hearthd", about = "Reactor-driven HTTP/1.1 static file server")]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Static content root
    #[arg(long)]
    root: Option<PathBuf>,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Idle connection timeout (e.g. 60s, 500ms); 0s disables
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Epoll trigger mode: 0=LT/LT 1=LT/ET 2=ET/LT 3=ET/ET
    #[arg(long)]
    trig_mode: Option<u8>,

    /// SO_LINGER on the listening socket
    #[arg(long)]
    linger: bool,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// debug | info | warn | error
    #[arg(long)]
    log_level: Option<Level>,

    /// Disable logging entirely
    #[arg(long)]
    quiet: bool,
}

fn load_config(args: &Args) -> Result<ServerConfig, Box<dyn Error>> {
    let mut cfg = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(root) = &args.root {
        cfg.root.clone_from(root);
    }
    if let Some(threads) = args.threads {
        cfg.thread_num = threads;
    }
    if let Some(timeout) = args.timeout {
        cfg.timeout_ms = timeout.as_millis() as u64;
    }
    if let Some(mode) = args.trig_mode {
        cfg.trig_mode = mode;
    }
    if args.linger {
        cfg.opt_linger = true;
    }
    if let Some(dir) = &args.log_dir {
        cfg.log.dir.clone_from(dir);
    }
    if let Some(level) = args.log_level {
        cfg.log.level = level;
    }
    if args.quiet {
        cfg.log.enabled = false;
    }
    Ok(cfg)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("hearthd: {err}");
            return ExitCode::FAILURE;
        }
    };

    let logger = if cfg.log.enabled {
        match Logger::to_dir(cfg.log.level, &cfg.log.dir, &cfg.log.suffix, cfg.log.queue_cap) {
            Ok(logger) => logger,
            Err(err) => {
                eprintln!("hearthd: couldn't open log dir {:?}: {err}", cfg.log.dir);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Logger::disabled()
    };

    // The pool sizes to the configured database; the handles themselves are
    // in-memory here. Embedders wire real database clients through the same
    // UserPool.
    let users: Option<UserPool> = cfg.db.as_ref().map(|db| MemoryStore::pool(db.pool_size));

    let mut server = match Server::new(cfg, logger.clone(), users) {
        Ok(server) => server,
        Err(err) => {
            log_error!(logger, "startup failed: {err}");
            logger.close();
            eprintln!("hearthd: {err}");
            return ExitCode::FAILURE;
        }
    };
    server.run();
    ExitCode::SUCCESS
}

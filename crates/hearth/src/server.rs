use std::{
    collections::HashMap,
    fs, io,
    net::{SocketAddr, TcpListener, TcpStream},
    os::fd::{AsRawFd, RawFd},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use hearth_log::{Logger, log_debug, log_error, log_info, log_warn};
use hearth_sync::WorkerPool;
use signal_hook::consts::{SIGINT, SIGTERM};
use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    ServerError,
    buffer::Buffer,
    config::ServerConfig,
    http::{Connection, Handler, Response, UserPool},
    poller::{Events, Interest, Poller},
    timer::TimerHeap,
    waker::Waker,
};

pub use crate::config::MAX_FD;

/// LT listeners get re-reported by the kernel, so bound each accept burst to
/// keep one hot listener from starving client fds.
const ACCEPTS_PER_TICK: usize = 64;
const EVENTS_CAPACITY: usize = 1024;
const LISTEN_BACKLOG: i32 = 6;

type ConnRef = Arc<Mutex<Connection>>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker-side view of the reactor: everything a finished task needs to
/// re-arm its fd or hand it back for reaping.
struct TaskCtx {
    poller: Arc<Poller>,
    handler: Handler,
    reaper: Arc<Reaper>,
    logger: Logger,
    /// Flags every connection registration carries besides its direction.
    conn_base: Interest,
}

/// Closure requests from worker tasks, drained by the reactor when the
/// eventfd fires.
struct Reaper {
    pending: Mutex<Vec<RawFd>>,
    waker: Waker,
}

impl Reaper {
    fn request_close(&self, fd: RawFd) {
        locked(&self.pending).push(fd);
        self.waker.wake();
    }

    fn take_pending(&self) -> Vec<RawFd> {
        std::mem::take(&mut locked(&self.pending))
    }
}

/// Remote control for a running server; usable from any thread.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    reaper: Arc<Reaper>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.reaper.waker.wake();
    }
}

/// Single-threaded reactor over one listening socket, many client sockets
/// and an eventfd wake source, with request work pushed to a fixed worker
/// pool.
///
/// Connection fds are registered `EPOLLONESHOT`, so at most one task per fd
/// is ever in flight; the finishing worker re-arms the fd's interest mask,
/// which is the happens-before edge that lets connections go unlocked in
/// practice.
pub struct Server {
    listener: TcpListener,
    listen_interest: Interest,
    poller: Arc<Poller>,
    timers: TimerHeap,
    conns: HashMap<RawFd, ConnRef>,
    workers: Option<WorkerPool>,
    ctx: Arc<TaskCtx>,
    logger: Logger,
    users: Option<UserPool>,
    user_count: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    timeout: Option<Duration>,
    max_conns: usize,
    conn_edge_triggered: bool,
    port: u16,
}

impl Server {
    pub fn new(
        cfg: ServerConfig,
        logger: Logger,
        users: Option<UserPool>,
    ) -> Result<Self, ServerError> {
        cfg.validate()?;

        let root = fs::canonicalize(&cfg.root).map_err(|_| ServerError::Root(cfg.root.clone()))?;
        if !root.is_dir() {
            return Err(ServerError::Root(cfg.root.clone()));
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
        let socket =
            Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(ServerError::Socket)?;
        socket.set_reuse_address(true).map_err(ServerError::Socket)?;
        if cfg.opt_linger {
            socket.set_linger(Some(Duration::from_secs(1))).map_err(ServerError::Socket)?;
        }
        socket.bind(&addr.into()).map_err(|source| ServerError::Bind { addr, source })?;
        socket.listen(LISTEN_BACKLOG).map_err(|source| ServerError::Listen { addr, source })?;
        socket.set_nonblocking(true).map_err(ServerError::Socket)?;
        let listener: TcpListener = socket.into();

        let poller = Arc::new(Poller::new().map_err(ServerError::Poller)?);
        let waker = Waker::new().map_err(ServerError::Poller)?;
        let reaper = Arc::new(Reaper { pending: Mutex::new(Vec::new()), waker });

        let mut listen_interest = Interest::READABLE | Interest::PEER_HUP;
        if cfg.listen_edge_triggered() {
            listen_interest |= Interest::EDGE;
        }
        let mut conn_base = Interest::ONESHOT | Interest::PEER_HUP;
        if cfg.conn_edge_triggered() {
            conn_base |= Interest::EDGE;
        }
        poller
            .add(listener.as_raw_fd(), listen_interest)
            .map_err(ServerError::Poller)?;
        poller
            .add(reaper.waker.fd(), Interest::READABLE)
            .map_err(ServerError::Poller)?;

        let handler = Handler::new(root, users.clone(), logger.clone());
        let ctx = Arc::new(TaskCtx {
            poller: Arc::clone(&poller),
            handler,
            reaper: Arc::clone(&reaper),
            logger: logger.clone(),
            conn_base,
        });

        Ok(Self {
            listener,
            listen_interest,
            poller,
            timers: TimerHeap::new(),
            conns: HashMap::new(),
            workers: Some(WorkerPool::new(cfg.thread_num)),
            ctx,
            logger,
            users,
            user_count: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            timeout: (cfg.timeout_ms > 0).then(|| Duration::from_millis(cfg.timeout_ms)),
            max_conns: cfg.max_conns,
            conn_edge_triggered: cfg.conn_edge_triggered(),
            port: cfg.port,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle { stop: Arc::clone(&self.stop), reaper: Arc::clone(&self.ctx.reaper) }
    }

    pub fn user_count(&self) -> usize {
        self.user_count.load(Ordering::Acquire)
    }

    /// Run until a signal or [`ServerHandle::stop`]. Startup has already
    /// succeeded by the time this is callable, so nothing fatal escapes the
    /// loop.
    pub fn run(&mut self) {
        let _ = signal_hook::flag::register(SIGINT, Arc::clone(&self.stop));
        let _ = signal_hook::flag::register(SIGTERM, Arc::clone(&self.stop));

        log_info!(
            self.logger,
            "listening on port {} ({} workers, idle timeout {:?})",
            self.port,
            self.workers.as_ref().map_or(0, WorkerPool::threads),
            self.timeout,
        );

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        while !self.stop.load(Ordering::Acquire) {
            let wait = if self.timeout.is_some() { self.timers.next_wait() } else { None };
            match self.poller.wait(&mut events, wait) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log_error!(self.logger, "poll failed: {err}");
                    break;
                }
            }
            for (fd, ready) in events.iter() {
                if fd == self.listener.as_raw_fd() {
                    self.accept_burst();
                } else if fd == self.ctx.reaper.waker.fd() {
                    self.ctx.reaper.waker.drain();
                    for fd in self.ctx.reaper.take_pending() {
                        self.close_conn(fd);
                    }
                } else if ready.intersects(Interest::HUP | Interest::ERROR | Interest::PEER_HUP) {
                    self.close_conn(fd);
                } else if ready.contains(Interest::READABLE) {
                    self.dispatch_read(fd);
                } else if ready.contains(Interest::WRITABLE) {
                    self.dispatch_write(fd);
                }
            }
            if self.timeout.is_some() {
                let mut expired = Vec::new();
                self.timers.tick(|fd| expired.push(fd));
                for fd in expired {
                    log_debug!(self.logger, "idle timeout on fd {fd}");
                    self.close_conn(fd);
                }
            }
        }
        self.shutdown();
    }

    fn accept_burst(&mut self) {
        let edge = self.listen_interest.contains(Interest::EDGE);
        let mut accepted = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    accepted += 1;
                    self.admit(stream, peer);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    log_warn!(self.logger, "accept failed: {err}");
                    break;
                }
            }
            if !edge && accepted >= ACCEPTS_PER_TICK {
                break;
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.user_count() >= self.max_conns {
            log_warn!(self.logger, "connection limit reached, refusing {peer}");
            Self::refuse(stream);
            return;
        }
        if let Err(err) = stream.set_nonblocking(true) {
            log_warn!(self.logger, "couldn't unblock client socket: {err}");
            return;
        }
        let fd = stream.as_raw_fd();
        let conn = Arc::new(Mutex::new(Connection::new(stream, peer, self.conn_edge_triggered)));
        self.conns.insert(fd, conn);
        let online = self.user_count.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(timeout) = self.timeout {
            self.timers.add(fd, timeout);
        }
        if let Err(err) = self.poller.add(fd, self.ctx.conn_base | Interest::READABLE) {
            log_error!(self.logger, "couldn't register fd {fd}: {err}");
            self.close_conn(fd);
            return;
        }
        log_info!(self.logger, "client {peer} connected (fd {fd}, {online} online)");
    }

    /// Over the connection cap: answer 503 inline on the (still blocking)
    /// socket and drop it.
    fn refuse(mut stream: TcpStream) {
        let mut head = Buffer::with_capacity(512);
        Response::write_unavailable(&mut head);
        let _ = io::Write::write(&mut stream, head.readable());
    }

    fn dispatch_read(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get(&fd) else { return };
        if let Some(timeout) = self.timeout {
            self.timers.adjust(fd, timeout);
        }
        let conn = Arc::clone(conn);
        let ctx = Arc::clone(&self.ctx);
        let submitted = self
            .workers
            .as_ref()
            .is_some_and(|w| w.submit(move || read_task(&ctx, &conn, fd)).is_ok());
        if !submitted {
            self.close_conn(fd);
        }
    }

    fn dispatch_write(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get(&fd) else { return };
        if let Some(timeout) = self.timeout {
            self.timers.adjust(fd, timeout);
        }
        let conn = Arc::clone(conn);
        let ctx = Arc::clone(&self.ctx);
        let submitted = self
            .workers
            .as_ref()
            .is_some_and(|w| w.submit(move || write_task(&ctx, &conn, fd)).is_ok());
        if !submitted {
            self.close_conn(fd);
        }
    }

    /// Reactor-side teardown: deregister, cancel the timer, shut the socket
    /// down and drop our reference. An in-flight task still holding the Arc
    /// finds `is_closed` and returns.
    fn close_conn(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.remove(&fd) else { return };
        self.timers.del(fd);
        let _ = self.poller.delete(fd);
        let peer = {
            let mut conn = locked(&conn);
            let peer = conn.peer();
            conn.close();
            peer
        };
        let online = self.user_count.fetch_sub(1, Ordering::AcqRel) - 1;
        log_info!(self.logger, "client {peer} gone (fd {fd}, {online} online)");
    }

    fn shutdown(&mut self) {
        log_info!(self.logger, "shutting down");
        let _ = self.poller.delete(self.listener.as_raw_fd());
        let open: Vec<RawFd> = self.conns.keys().copied().collect();
        for fd in open {
            self.close_conn(fd);
        }
        self.timers.expire_all(|_| {});
        // joins every worker, draining tasks already queued
        drop(self.workers.take());
        if let Some(users) = &self.users {
            users.close();
        }
        self.logger.close();
    }
}

/// Read-ready task: pull bytes, then parse-and-stage. The interest flip at
/// the end is what re-arms the oneshot fd.
fn read_task(ctx: &TaskCtx, conn: &Mutex<Connection>, fd: RawFd) {
    let mut conn = locked(conn);
    if conn.is_closed() {
        return;
    }
    match conn.read() {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(err) => {
            if err.kind() != io::ErrorKind::UnexpectedEof {
                log_debug!(ctx.logger, "read error on fd {fd}: {err}");
            }
            conn.close();
            ctx.reaper.request_close(fd);
            return;
        }
    }
    advance(ctx, &mut conn, fd);
}

/// Write-ready task: drain the response plan; on completion either recycle
/// the connection for keep-alive (which may immediately serve pipelined
/// bytes) or hand it to the reaper.
fn write_task(ctx: &TaskCtx, conn: &Mutex<Connection>, fd: RawFd) {
    let mut conn = locked(conn);
    if conn.is_closed() {
        return;
    }
    if let Err(err) = conn.write() {
        log_debug!(ctx.logger, "write error on fd {fd}: {err}");
        conn.close();
        ctx.reaper.request_close(fd);
        return;
    }
    if conn.to_write() > 0 {
        rearm(ctx, fd, Interest::WRITABLE);
        return;
    }
    if conn.is_keep_alive() {
        advance(ctx, &mut conn, fd);
    } else {
        conn.close();
        ctx.reaper.request_close(fd);
    }
}

fn advance(ctx: &TaskCtx, conn: &mut Connection, fd: RawFd) {
    if conn.process(&ctx.handler) {
        rearm(ctx, fd, Interest::WRITABLE);
    } else {
        rearm(ctx, fd, Interest::READABLE);
    }
}

fn rearm(ctx: &TaskCtx, fd: RawFd, direction: Interest) {
    if let Err(err) = ctx.poller.modify(fd, ctx.conn_base | direction) {
        // the reactor reaped this fd while we were working
        log_debug!(ctx.logger, "couldn't re-arm fd {fd}: {err}");
        ctx.reaper.request_close(fd);
    }
}

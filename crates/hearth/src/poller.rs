use std::{io, os::fd::RawFd, time::Duration};

use bitflags::bitflags;

bitflags! {
    /// Epoll interest / readiness mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u32 {
        const READABLE = libc::EPOLLIN as u32;
        const WRITABLE = libc::EPOLLOUT as u32;
        const PEER_HUP = libc::EPOLLRDHUP as u32;
        const HUP      = libc::EPOLLHUP as u32;
        const ERROR    = libc::EPOLLERR as u32;
        const EDGE     = libc::EPOLLET as u32;
        const ONESHOT  = libc::EPOLLONESHOT as u32;
    }
}

/// Buffer of kernel-reported events for one `wait` call.
pub struct Events {
    buf: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawFd, Interest)> + '_ {
        self.buf.iter().map(|ev| {
            let fd = ev.u64 as RawFd;
            let ready = Interest::from_bits_retain(ev.events);
            (fd, ready)
        })
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Thin wrapper over an epoll instance. Registrations carry the fd itself as
/// the event token. `epoll_ctl` is safe to call from any thread, which is
/// what lets finished worker tasks re-arm their connection's interest.
pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Interest::empty())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event { events: interest.bits(), u64: fd as u64 };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &raw mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until readiness or `timeout`; `None` waits indefinitely.
    /// Sub-millisecond timeouts are rounded up so a near deadline does not
    /// spin.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => {
                let mut ms = d.as_millis().min(i32::MAX as u128 - 1) as i64;
                if d.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                ms as libc::c_int
            }
        };
        let capacity = events.buf.capacity() as libc::c_int;
        let n = unsafe {
            libc::epoll_wait(self.epfd, events.buf.as_mut_ptr(), capacity, timeout_ms)
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { events.buf.set_len(n as usize) };
        Ok(n as usize)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

use std::{io, os::fd::RawFd};

/// Eventfd-backed wake source for the reactor.
///
/// Worker threads write it after marking a connection closed so the reactor
/// leaves its poll call and reaps; it also breaks the poll for an explicit
/// `stop()`.
pub struct Waker {
    fd: RawFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn wake(&self) {
        let one: u64 = 1;
        let _ = unsafe { libc::write(self.fd, (&raw const one).cast(), 8) };
    }

    /// Reset the counter so the fd stops reporting readable.
    pub fn drain(&self) {
        let mut count: u64 = 0;
        let _ = unsafe { libc::read(self.fd, (&raw mut count).cast(), 8) };
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

use std::{io, os::fd::RawFd};

const INITIAL_SIZE: usize = 1024;
const SCRATCH_SIZE: usize = 64 * 1024;

/// Duplex byte buffer for one connection.
///
/// The storage is a contiguous region indexed by
/// `read_pos <= write_pos <= capacity`: bytes in `read_pos..write_pos` are
/// readable, `write_pos..capacity` is writable, and the space before
/// `read_pos` is reclaimed by compaction before the storage grows.
///
/// Not thread-safe; each buffer is confined to one connection handled
/// serially.
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: vec![0; capacity], read_pos: 0, write_pos: 0 }
    }

    pub fn readable_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable_len(&self) -> usize {
        self.data.len() - self.write_pos
    }

    pub fn prependable_len(&self) -> usize {
        self.read_pos
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The readable region, without consuming it.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Advance the read index past `n` consumed bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.readable_len());
        self.read_pos += n;
    }

    /// Zero the storage and reset both indices.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Take every readable byte and reset the buffer.
    pub fn take_all(&mut self) -> Vec<u8> {
        let bytes = self.readable().to_vec();
        self.clear();
        bytes
    }

    /// Take every readable byte as a (lossy) string and reset the buffer.
    pub fn take_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.readable()).into_owned();
        self.clear();
        s
    }

    /// Make sure at least `n` bytes can be written without another
    /// allocation check.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable_len() < n {
            self.make_space(n);
        }
        debug_assert!(self.writable_len() >= n);
    }

    /// The writable tail. Pair with [`commit`](Self::commit).
    pub fn writable_mut(&mut self) -> &mut [u8] {
        let start = self.write_pos;
        &mut self.data[start..]
    }

    /// Record `n` bytes written into the writable tail.
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.writable_len());
        self.write_pos += n;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write_pos;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    fn make_space(&mut self, n: usize) {
        if self.writable_len() + self.prependable_len() < n {
            self.data.resize(self.write_pos + n + 1, 0);
        } else {
            // slide the readable region to the front instead of growing
            let readable = self.readable_len();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Vectored read from `fd`: the first segment is the buffer's own
    /// writable tail, the second a stack scratch so a single syscall can
    /// deliver more than the current capacity. Scratch overflow is appended
    /// afterwards, growing the buffer. Returns `Ok(0)` on EOF.
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable_len();
        let iov = [
            libc::iovec {
                iov_base: self.data[self.write_pos..].as_mut_ptr().cast(),
                iov_len: writable,
            },
            libc::iovec { iov_base: scratch.as_mut_ptr().cast(), iov_len: SCRATCH_SIZE },
        ];
        let n = unsafe { libc::readv(fd, iov.as_ptr(), 2) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    /// Write the readable region to `fd`, consuming whatever the kernel
    /// accepted.
    pub fn write_to_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let readable = self.readable_len();
        let n = unsafe { libc::write(fd, self.data[self.read_pos..].as_ptr().cast(), readable) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        self.read_pos += n as usize;
        Ok(n as usize)
    }
}

use std::{
    io,
    net::{SocketAddr, TcpStream},
    os::fd::{AsRawFd, RawFd},
};

use crate::{
    buffer::Buffer,
    http::{FileMap, Handled, Handler},
};

/// In LT mode, keep calling writev while this much is still pending rather
/// than going back through the poller for every burst.
const LT_WRITE_BURST: usize = 10 * 1024;

/// Per-fd connection state: two buffers, the staged response file and the
/// write plan over both.
///
/// A connection is confined to one task at a time by the reactor's oneshot
/// dispatch; nothing here needs its own lock.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    read_buf: Buffer,
    write_buf: Buffer,
    file: Option<FileMap>,
    file_written: usize,
    closed: bool,
    keep_alive: bool,
    edge_triggered: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, edge_triggered: bool) -> Self {
        Self {
            stream,
            peer,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            file: None,
            file_written: 0,
            closed: false,
            keep_alive: false,
            edge_triggered,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn pending_input(&self) -> usize {
        self.read_buf.readable_len()
    }

    /// Remaining response bytes: unsent head plus unsent file body.
    pub fn to_write(&self) -> usize {
        self.write_buf.readable_len()
            + self.file.as_ref().map_or(0, |f| f.len() - self.file_written)
    }

    /// Pull socket bytes into the read buffer. ET drains until the kernel
    /// blocks; LT takes one bite and lets the poller re-report. EOF with
    /// nothing read is the peer hanging up.
    pub fn read(&mut self) -> io::Result<usize> {
        let mut total = 0;
        let mut peer_closed = false;
        loop {
            match self.read_buf.read_from_fd(self.fd()) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    total += n;
                    if !self.edge_triggered {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        if total == 0 && peer_closed {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(total)
    }

    /// Run the buffered bytes through the handler. `true` means a response
    /// is staged and the fd should flip to write interest.
    pub fn process(&mut self, handler: &Handler) -> bool {
        match handler.handle(&mut self.read_buf, &mut self.write_buf) {
            Handled::Incomplete => false,
            Handled::Response { keep_alive, file } => {
                self.keep_alive = keep_alive;
                self.file = file;
                self.file_written = 0;
                true
            }
        }
    }

    /// Drain the staged response with vectored writes. Partial progress may
    /// stop anywhere, including inside the head segment, so both segments
    /// are re-derived from written counts on every pass.
    pub fn write(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            if self.to_write() == 0 {
                // fully drained; release the file map and head storage
                self.write_buf.clear();
                self.file = None;
                self.file_written = 0;
                break;
            }
            let (head_ptr, head_len, body_ptr, body_len) = {
                let head = self.write_buf.readable();
                let body = self
                    .file
                    .as_ref()
                    .map_or(&[][..], |f| &f.as_slice()[self.file_written..]);
                (head.as_ptr(), head.len(), body.as_ptr(), body.len())
            };
            let iov = [
                libc::iovec { iov_base: head_ptr.cast_mut().cast(), iov_len: head_len },
                libc::iovec { iov_base: body_ptr.cast_mut().cast(), iov_len: body_len },
            ];
            let n = unsafe { libc::writev(self.fd(), iov.as_ptr(), 2) };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }
            let n = n as usize;
            total += n;
            if n >= head_len {
                self.write_buf.consume(head_len);
                self.file_written += n - head_len;
            } else {
                self.write_buf.consume(n);
            }
            let remaining = self.to_write();
            if !self.edge_triggered && remaining > 0 && remaining <= LT_WRITE_BURST {
                // LT: the poller re-reports; only big backlogs are worth
                // draining inline
                break;
            }
        }
        Ok(total)
    }

    /// Release the response file, shut the socket down and mark the
    /// connection closed. The fd itself lives until the last owner drops
    /// the connection, so late tasks never touch a recycled descriptor.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.file = None;
        self.file_written = 0;
        self.closed = true;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod test {
    use std::{
        fs,
        io::{Read, Write},
        net::{TcpListener, TcpStream},
        path::Path,
    };

    use hearth_log::Logger;

    use super::*;

    fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    fn handler_with_index(root: &Path, body: &str) -> Handler {
        fs::write(root.join("index.html"), body).unwrap();
        Handler::new(root.to_path_buf(), None, Logger::disabled())
    }

    #[test]
    fn read_process_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler_with_index(dir.path(), "<html>round trip</html>");

        let (mut client, server, peer) = socket_pair();
        server.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(server, peer, true);

        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        // give the loopback a moment to deliver
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(conn.read().unwrap() > 0);
        assert!(conn.process(&handler));
        assert!(conn.is_keep_alive());
        assert!(conn.to_write() > 0);

        while conn.to_write() > 0 {
            conn.write().unwrap();
        }
        assert_eq!(conn.to_write(), 0);

        drop(conn);
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("<html>round trip</html>"));
    }

    #[test]
    fn incomplete_request_reports_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler_with_index(dir.path(), "x");

        let (mut client, server, peer) = socket_pair();
        server.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(server, peer, true);

        client.write_all(b"GET / HTT").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(conn.read().unwrap() > 0);
        assert!(!conn.process(&handler));
        assert_eq!(conn.pending_input(), 9);
    }

    #[test]
    fn eof_without_data_is_unexpected_eof() {
        let (client, server, peer) = socket_pair();
        server.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(server, peer, true);
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(20));

        let err = conn.read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn close_is_idempotent_and_releases_the_file() {
        let (_client, server, peer) = socket_pair();
        let mut conn = Connection::new(server, peer, false);
        conn.close();
        assert!(conn.is_closed());
        conn.close();
        assert_eq!(conn.to_write(), 0);
    }
}

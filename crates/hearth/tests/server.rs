//! End-to-end tests over real sockets: one server thread per test, plain
//! `TcpStream` clients.

use std::{
    fs,
    io::{Read, Write},
    net::TcpStream,
    thread,
    time::{Duration, Instant},
};

use hearth::{
    config::ServerConfig,
    server::{Server, ServerHandle},
};
use hearth_log::Logger;
use tempfile::TempDir;

struct TestServer {
    handle: ServerHandle,
    join: Option<thread::JoinHandle<()>>,
    port: u16,
    _root: TempDir,
}

impl TestServer {
    fn start(port: u16, timeout_ms: u64, max_conns: usize) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), "<html>hello from hearth</html>").unwrap();

        let cfg = ServerConfig {
            port,
            trig_mode: 3,
            timeout_ms,
            thread_num: 2,
            root: root.path().to_path_buf(),
            max_conns,
            ..Default::default()
        };
        let mut server = Server::new(cfg, Logger::disabled(), None).unwrap();
        let handle = server.handle();
        let join = thread::spawn(move || server.run());
        Self { handle, join: Some(join), port, _root: root }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Read one response: head up to the blank line, then exactly
/// `Content-Length` body bytes.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0, "peer closed mid-head");
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .expect("response without Content-Length");
    let mut body = vec![0u8; content_length];
    stream.read_exact(&mut body).unwrap();
    (head, body)
}

fn reads_eof(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(stream.read(&mut byte), Ok(0))
}

#[test]
fn keep_alive_serves_two_requests_on_one_socket() {
    let server = TestServer::start(18316, 60_000, 1024);
    let mut client = server.connect();

    for _ in 0..2 {
        client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head was: {head}");
        assert!(head.contains("Connection: keep-alive"));
        assert_eq!(body, b"<html>hello from hearth</html>");
    }
}

#[test]
fn connection_close_tears_the_socket_down() {
    let server = TestServer::start(18317, 60_000, 1024);
    let mut client = server.connect();

    client
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (head, body) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, b"<html>hello from hearth</html>");

    assert!(reads_eof(&mut client));
}

#[test]
fn idle_connection_times_out() {
    let server = TestServer::start(18318, 300, 1024);
    let mut client = server.connect();

    // send nothing; the server should hang up at the idle deadline
    let start = Instant::now();
    assert!(reads_eof(&mut client));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(250), "closed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "closed too late: {elapsed:?}");
}

#[test]
fn large_body_is_buffered_across_et_reads() {
    let server = TestServer::start(18319, 60_000, 1024);
    let mut client = server.connect();

    let body = vec![b'x'; 200 * 1024];
    let head = format!(
        "POST /index.html HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    client.write_all(head.as_bytes()).unwrap();
    client.write_all(&body).unwrap();

    // the server answers only once the whole declared body has arrived
    let (head, _) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head was: {head}");
}

#[test]
fn over_the_connection_cap_gets_a_503() {
    let server = TestServer::start(18320, 60_000, 1);

    let mut first = server.connect();
    first
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (head, _) = read_response(&mut first);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));

    let mut second = server.connect();
    let (head, body) = read_response(&mut second);
    assert!(head.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "head was: {head}");
    assert!(!body.is_empty());
    assert!(reads_eof(&mut second));

    // the admitted connection is still being served
    first
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (head, _) = read_response(&mut first);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let server = TestServer::start(18321, 60_000, 1024);
    let mut client = server.connect();

    let one = b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n";
    let mut both = Vec::from(&one[..]);
    both.extend_from_slice(one);
    client.write_all(&both).unwrap();

    for _ in 0..2 {
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body, b"<html>hello from hearth</html>");
    }
}

#[test]
fn malformed_request_gets_a_400_and_a_close() {
    let server = TestServer::start(18322, 60_000, 1024);
    let mut client = server.connect();

    client.write_all(b"\x01\x02 definitely not http\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "head was: {head}");
    assert!(reads_eof(&mut client));
}

#[test]
fn stop_handle_shuts_the_server_down() {
    let server = TestServer::start(18323, 60_000, 1024);
    let mut client = server.connect();
    client
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let (head, _) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 200"));

    server.handle.stop();
    // the open connection is closed as part of shutdown
    assert!(reads_eof(&mut client));
}

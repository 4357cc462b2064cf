use std::path::{Path, PathBuf};

use hearth_log::{Logger, log_debug, log_error, log_warn};

use crate::{
    buffer::Buffer,
    http::{FileMap, ParseResult, Request, Response, UserPool},
};

/// Outcome of feeding buffered bytes through the request pipeline.
pub enum Handled {
    /// Not enough bytes for a full request yet; keep reading.
    Incomplete,
    /// A response head (and maybe a file body) has been staged.
    Response { keep_alive: bool, file: Option<FileMap> },
}

/// The `process(request_bytes) -> response_bytes + file map` stage run on
/// worker threads: parse, route, stat + map the target file, serialize the
/// head. Shared read-only across workers.
pub struct Handler {
    root: PathBuf,
    users: Option<UserPool>,
    logger: Logger,
}

impl Handler {
    pub fn new(root: PathBuf, users: Option<UserPool>, logger: Logger) -> Self {
        Self { root, users, logger }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn handle(&self, read_buf: &mut Buffer, write_buf: &mut Buffer) -> Handled {
        if read_buf.readable_len() == 0 {
            return Handled::Incomplete;
        }
        match Request::parse(read_buf.readable()) {
            Ok(ParseResult::Incomplete) => Handled::Incomplete,
            Ok(ParseResult::Complete(req)) => {
                read_buf.consume(req.consumed);
                let path = self.route(&req);
                let file = Response::write_into(write_buf, &self.root, &path, 200, req.keep_alive);
                log_debug!(self.logger, "{} {} -> {}", req.method, req.path, path);
                Handled::Response { keep_alive: req.keep_alive, file }
            }
            Err(err) => {
                log_warn!(self.logger, "bad request: {err}");
                let garbage = read_buf.readable_len();
                read_buf.consume(garbage);
                let file = Response::write_into(write_buf, &self.root, "", 400, false);
                Handled::Response { keep_alive: false, file }
            }
        }
    }

    /// Form actions rewrite the target page; everything else is served
    /// as requested.
    fn route(&self, req: &Request) -> String {
        if req.method == "POST" && (req.path == "/login.html" || req.path == "/register.html") {
            let user = req.form.get("username").map_or("", String::as_str);
            let password = req.form.get("password").map_or("", String::as_str);
            let login = req.path == "/login.html";
            let ok = self.check_user(login, user, password);
            return if ok { "/welcome.html" } else { "/error.html" }.to_string();
        }
        req.path.clone()
    }

    fn check_user(&self, login: bool, user: &str, password: &str) -> bool {
        let Some(pool) = &self.users else {
            log_warn!(self.logger, "form action without a user store");
            return false;
        };
        match pool.acquire() {
            Ok(mut lease) => {
                if login {
                    lease.verify(user, password)
                } else {
                    lease.register(user, password)
                }
            }
            Err(err) => {
                log_error!(self.logger, "user store unavailable: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{fs, io::Write};

    use hearth_log::Logger;

    use super::*;
    use crate::http::MemoryStore;

    fn fixture() -> (tempfile::TempDir, Handler) {
        let dir = tempfile::tempdir().unwrap();
        for name in ["index.html", "welcome.html", "error.html"] {
            let mut f = fs::File::create(dir.path().join(name)).unwrap();
            write!(f, "<html>{name}</html>").unwrap();
        }
        let handler = Handler::new(
            dir.path().to_path_buf(),
            Some(MemoryStore::new().with_user("jane", "pw").into_pool(2)),
            Logger::disabled(),
        );
        (dir, handler)
    }

    fn run(handler: &Handler, input: &[u8]) -> (String, Option<FileMap>, bool) {
        let mut read_buf = Buffer::new();
        let mut write_buf = Buffer::new();
        read_buf.append(input);
        match handler.handle(&mut read_buf, &mut write_buf) {
            Handled::Incomplete => panic!("expected a staged response"),
            Handled::Response { keep_alive, file } => {
                (write_buf.take_string(), file, keep_alive)
            }
        }
    }

    #[test]
    fn get_serves_the_mapped_file() {
        let (_dir, handler) = fixture();
        let (head, file, keep_alive) = run(&handler, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(keep_alive);
        assert_eq!(file.unwrap().as_slice(), b"<html>index.html</html>");
    }

    #[test]
    fn incomplete_input_stays_buffered() {
        let (_dir, handler) = fixture();
        let mut read_buf = Buffer::new();
        let mut write_buf = Buffer::new();
        read_buf.append(b"GET / HT");
        assert!(matches!(
            handler.handle(&mut read_buf, &mut write_buf),
            Handled::Incomplete
        ));
        assert_eq!(read_buf.readable_len(), 8);
        assert_eq!(write_buf.readable_len(), 0);
    }

    #[test]
    fn good_login_lands_on_welcome() {
        let (_dir, handler) = fixture();
        let body = "username=jane&password=pw";
        let input = format!(
            "POST /login HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (head, file, _) = run(&handler, input.as_bytes());
        assert!(head.starts_with("HTTP/1.1 200"));
        assert_eq!(file.unwrap().as_slice(), b"<html>welcome.html</html>");
    }

    #[test]
    fn bad_login_lands_on_error() {
        let (_dir, handler) = fixture();
        let body = "username=jane&password=nope";
        let input = format!(
            "POST /login HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (_, file, _) = run(&handler, input.as_bytes());
        assert_eq!(file.unwrap().as_slice(), b"<html>error.html</html>");
    }

    #[test]
    fn register_then_login_works() {
        let (_dir, handler) = fixture();
        let register = "username=sam&password=s3cret";
        let input = format!(
            "POST /register HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            register.len(),
            register
        );
        let (_, file, _) = run(&handler, input.as_bytes());
        assert_eq!(file.unwrap().as_slice(), b"<html>welcome.html</html>");

        let login = "username=sam&password=s3cret";
        let input = format!(
            "POST /login HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            login.len(),
            login
        );
        let (_, file, _) = run(&handler, input.as_bytes());
        assert_eq!(file.unwrap().as_slice(), b"<html>welcome.html</html>");
    }

    #[test]
    fn malformed_head_becomes_a_400_close() {
        let (_dir, handler) = fixture();
        let (head, _, keep_alive) = run(&handler, b"\x01\x02 not http\r\n\r\n");
        assert!(head.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(!keep_alive);
    }

    #[test]
    fn pipelined_leftovers_stay_readable() {
        let (_dir, handler) = fixture();
        let mut read_buf = Buffer::new();
        let mut write_buf = Buffer::new();
        read_buf.append(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nGET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let first = handler.handle(&mut read_buf, &mut write_buf);
        assert!(matches!(first, Handled::Response { .. }));
        assert!(read_buf.readable_len() > 0);

        let mut write_buf2 = Buffer::new();
        let second = handler.handle(&mut read_buf, &mut write_buf2);
        assert!(matches!(second, Handled::Response { .. }));
        assert_eq!(read_buf.readable_len(), 0);
    }
}

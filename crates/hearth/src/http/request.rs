use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use crate::http::HttpError;

const MAX_HEADERS: usize = 32;
/// Upper bound on a form body; anything bigger is a client error.
const MAX_BODY: usize = 1 << 20;

/// Pages served without an extension in the original site layout.
const DEFAULT_PAGES: [&str; 6] =
    ["/index", "/register", "/login", "/welcome", "/video", "/picture"];

#[derive(Debug)]
pub enum ParseResult {
    /// The head or the declared body has not fully arrived yet.
    Incomplete,
    Complete(Request),
}

/// One parsed request. `consumed` is how many input bytes (head + body) it
/// covered, so pipelined successors stay in the buffer.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Minor HTTP version: 0 for 1.0, 1 for 1.1.
    pub version: u8,
    pub keep_alive: bool,
    pub form: HashMap<String, String>,
    pub consumed: usize,
}

impl Request {
    pub fn parse(input: &[u8]) -> Result<ParseResult, HttpError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Request::new(&mut headers);
        let head_len = match head.parse(input) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(ParseResult::Incomplete),
            Err(_) => return Err(HttpError::BadHead),
        };

        let method = head.method.ok_or(HttpError::BadHead)?.to_string();
        let raw_path = head.path.ok_or(HttpError::BadHead)?;
        let version = head.version.ok_or(HttpError::BadHead)?;

        let mut content_length = 0usize;
        let mut connection: Option<&str> = None;
        let mut form_body = false;
        for header in head.headers.iter() {
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length = std::str::from_utf8(header.value)
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or(HttpError::BadContentLength)?;
            } else if header.name.eq_ignore_ascii_case("connection") {
                connection = std::str::from_utf8(header.value).ok().map(str::trim);
            } else if header.name.eq_ignore_ascii_case("content-type") {
                form_body = header
                    .value
                    .starts_with(b"application/x-www-form-urlencoded");
            }
        }
        if content_length > MAX_BODY {
            return Err(HttpError::BodyTooLarge(MAX_BODY));
        }
        if input.len() < head_len + content_length {
            return Ok(ParseResult::Incomplete);
        }

        let keep_alive = match connection {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => version == 1,
        };

        let body = &input[head_len..head_len + content_length];
        let form = if method == "POST" && form_body {
            parse_form(body)
        } else {
            HashMap::new()
        };

        Ok(ParseResult::Complete(Request {
            method,
            path: normalize_path(raw_path),
            version,
            keep_alive,
            form,
            consumed: head_len + content_length,
        }))
    }
}

fn normalize_path(raw: &str) -> String {
    let raw = raw.split('?').next().unwrap_or(raw);
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    if decoded == "/" {
        return "/index.html".to_string();
    }
    if DEFAULT_PAGES.contains(&decoded.as_ref()) {
        return format!("{decoded}.html");
    }
    decoded.into_owned()
}

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    let mut form = HashMap::new();
    for pair in text.split('&') {
        let Some((key, value)) = pair.split_once('=') else { continue };
        form.insert(decode_component(key), decode_component(value));
    }
    form
}

fn decode_component(raw: &str) -> String {
    let unplussed = raw.replace('+', " ");
    percent_decode_str(&unplussed).decode_utf8_lossy().into_owned()
}

use std::{fs, os::unix::fs::PermissionsExt, path::Path};

use crate::{buffer::Buffer, http::FileMap};

const SUFFIX_TYPES: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".rtf", "application/rtf"),
    (".pdf", "application/pdf"),
    (".word", "application/msword"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".au", "audio/basic"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".avi", "video/x-msvideo"),
    (".gz", "application/x-gzip"),
    (".tar", "application/x-tar"),
    (".css", "text/css"),
    (".js", "text/javascript"),
];

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Internal Error",
    }
}

fn mime_for(path: &str) -> &'static str {
    if let Some(dot) = path.rfind('.') {
        let suffix = &path[dot..];
        for (ext, mime) in SUFFIX_TYPES {
            if suffix.eq_ignore_ascii_case(ext) {
                return mime;
            }
        }
    }
    "text/plain"
}

fn error_body(code: u16) -> String {
    format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">\
         {code} : {status}\n<p>{status}</p><hr><em>hearth</em></body></html>",
        status = status_text(code),
    )
}

/// Response assembly: status the target file, serialize the head (and inline
/// body for error pages) into the write buffer, and hand back the mapped
/// file body when one is served.
pub struct Response;

impl Response {
    pub fn write_into(
        buf: &mut Buffer,
        root: &Path,
        req_path: &str,
        code: u16,
        keep_alive: bool,
    ) -> Option<FileMap> {
        let mut code = code;
        let mut rel = req_path.trim_start_matches('/').to_string();

        // never step out of the content root
        if req_path.split('/').any(|seg| seg == "..") {
            code = 403;
        }
        if code == 200 {
            match fs::metadata(root.join(&rel)) {
                Ok(meta) if meta.is_dir() => code = 404,
                Ok(meta) if meta.permissions().mode() & 0o004 == 0 => code = 403,
                Ok(_) => {}
                Err(_) => code = 404,
            }
        }
        if code != 200 {
            // serve the site's own error page when it has one
            let candidate = format!("{code}.html");
            if root.join(&candidate).is_file() {
                rel = candidate;
            } else {
                rel.clear();
            }
        }

        let file = if rel.is_empty() { None } else { FileMap::open(&root.join(&rel)).ok() };

        buf.append(format!("HTTP/1.1 {code} {}\r\n", status_text(code)).as_bytes());
        if keep_alive {
            buf.append(b"Connection: keep-alive\r\n");
            buf.append(b"Keep-Alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"Connection: close\r\n");
        }
        match &file {
            Some(map) => {
                buf.append(format!("Content-Type: {}\r\n", mime_for(&rel)).as_bytes());
                buf.append(format!("Content-Length: {}\r\n\r\n", map.len()).as_bytes());
            }
            None => {
                let body = error_body(code);
                buf.append(b"Content-Type: text/html\r\n");
                buf.append(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
                buf.append(body.as_bytes());
            }
        }
        file
    }

    /// Canned 503 for the overload path; written inline by the reactor, so
    /// no file map is involved.
    pub fn write_unavailable(buf: &mut Buffer) {
        let body = error_body(503);
        buf.append(b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\n");
        buf.append(b"Content-Type: text/html\r\n");
        buf.append(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        buf.append(body.as_bytes());
    }
}

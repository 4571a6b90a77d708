use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::{Method, StatusCode};
use mime_guess::mime;
use std::io::{self, Read};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::Handler;
use crate::fs::{DirEntry, FileSystem, Node, OpenFile};
use crate::http::{base_name, clean_path, encode_path, escape_html, Request, Response};

const INDEX_FILE: &str = "index.html";

/// Serves the contents of a [`FileSystem`]: files, `index.html` for
/// directories, and a plain listing when a directory has no index.
///
/// Files honour a single `Range` and `If-Modified-Since`.
#[derive(Debug, Clone)]
pub struct FileServer<F> {
    fs: F,
}

impl<F: FileSystem> FileServer<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }
}

impl<F: FileSystem> Handler for FileServer<F> {
    fn serve(&self, request: &Request) -> Response {
        let mut upath = request.path.clone();
        if !upath.starts_with(b"/") {
            upath.insert(0, b'/');
        }
        let name = clean_path(&upath);

        match self.fs.open(&name) {
            Err(e) => error_response(&name, &e),
            Ok(Node::Directory(entries)) => {
                if !upath.ends_with(b"/") {
                    return local_redirect(request, &[base_name(&upath), &b"/"[..]].concat());
                }
                let mut index = name;
                if !index.ends_with(b"/") {
                    index.push(b'/');
                }
                index.extend_from_slice(INDEX_FILE.as_bytes());
                match self.fs.open(&index) {
                    Ok(Node::File(file)) => serve_file(request, file),
                    _ => directory_listing(&entries),
                }
            }
            Ok(Node::File(file)) => {
                if upath.ends_with(b"/") {
                    return local_redirect(request, &[&b"../"[..], base_name(&upath)].concat());
                }
                serve_file(request, file)
            }
        }
    }
}

fn error_response(path: &[u8], e: &io::Error) -> Response {
    let path = String::from_utf8_lossy(path);
    match e.kind() {
        io::ErrorKind::NotFound => Response::not_found(),
        io::ErrorKind::PermissionDenied => {
            log::debug!("Refusing {}: {}", path, e);
            Response::forbidden()
        }
        _ => {
            log::warn!("Failed to open {}: {}", path, e);
            Response::internal_error()
        }
    }
}

// Relative to the request URL, so it stays correct under a stripped prefix.
fn local_redirect(request: &Request, location: &[u8]) -> Response {
    Response::redirect(&request.keep_query(&encode_path(location)))
}

fn serve_file(request: &Request, mut file: OpenFile) -> Response {
    let modified = file.modified.and_then(truncate_to_secs);
    if let Some(modified) = modified {
        if not_modified_since(request, modified) {
            return Response {
                status: StatusCode::NOT_MODIFIED,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }
            .with_header(header::LAST_MODIFIED, &httpdate::fmt_http_date(modified));
        }
    }

    let mut content = Vec::with_capacity(usize::try_from(file.len).unwrap_or(0));
    if let Err(e) = file.reader.read_to_end(&mut content) {
        log::warn!("Failed to read {}: {}", file.name, e);
        return Response::internal_error();
    }

    let content_type = content_type(&file.name, &content);
    let len = content.len() as u64;
    let response = match requested_range(request, modified, len) {
        ByteRange::Full => Response::new(StatusCode::OK, &content_type, content),
        ByteRange::Partial { start, end } => {
            // Both bounds are below `content.len()`.
            let body = Bytes::from(content).slice(start as usize..=end as usize);
            Response::new(StatusCode::PARTIAL_CONTENT, &content_type, body)
                .with_header(header::CONTENT_RANGE, &format!("bytes {start}-{end}/{len}"))
        }
        ByteRange::Unsatisfiable => {
            log::debug!("Unsatisfiable range for {} ({} bytes)", file.name, len);
            Response::error(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "416 Requested Range Not Satisfiable",
            )
            .with_header(header::CONTENT_RANGE, &format!("bytes */{len}"))
        }
    }
    .with_header(header::ACCEPT_RANGES, "bytes");

    match file.modified {
        Some(modified) => {
            response.with_header(header::LAST_MODIFIED, &httpdate::fmt_http_date(modified))
        }
        None => response,
    }
}

/// Which part of a file a request asked for. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

fn requested_range(request: &Request, modified: Option<SystemTime>, len: u64) -> ByteRange {
    if request.method != Method::GET && request.method != Method::HEAD {
        return ByteRange::Full;
    }
    // `If-Range` only ever carries a date here; anything else means the
    // client's copy may be stale.
    if let Some(validator) = request.header(header::IF_RANGE) {
        let unchanged = httpdate::parse_http_date(validator)
            .ok()
            .is_some_and(|date| Some(date) == modified);
        if !unchanged {
            return ByteRange::Full;
        }
    }
    byte_range(request.header(header::RANGE), len)
}

/// Interprets a `Range` header against `len` bytes of content.
///
/// One `bytes=a-b`, `bytes=a-` or `bytes=-n` range is honoured. A list of
/// ranges is answered with the whole file, and an empty file ignores the
/// header altogether.
fn byte_range(header: Option<&str>, len: u64) -> ByteRange {
    let Some(header) = header else {
        return ByteRange::Full;
    };
    if len == 0 {
        return ByteRange::Full;
    }
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Unsatisfiable;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Unsatisfiable;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return match end.parse::<u64>() {
            Ok(suffix) if suffix > 0 => ByteRange::Partial {
                start: len.saturating_sub(suffix),
                end: len - 1,
            },
            _ => ByteRange::Unsatisfiable,
        };
    }

    let start = match start.parse::<u64>() {
        Ok(start) if start < len => start,
        _ => return ByteRange::Unsatisfiable,
    };
    let end = if end.is_empty() {
        len - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(len - 1),
            _ => return ByteRange::Unsatisfiable,
        }
    };
    ByteRange::Partial { start, end }
}

// HTTP dates have second precision.
fn truncate_to_secs(time: SystemTime) -> Option<SystemTime> {
    let secs = time.duration_since(UNIX_EPOCH).ok()?.as_secs();
    (secs > 0).then(|| UNIX_EPOCH + Duration::from_secs(secs))
}

fn not_modified_since(request: &Request, modified: SystemTime) -> bool {
    if request.method != Method::GET && request.method != Method::HEAD {
        return false;
    }
    request
        .header(header::IF_MODIFIED_SINCE)
        .and_then(|since| httpdate::parse_http_date(since).ok())
        .is_some_and(|since| modified <= since)
}

fn content_type(name: &str, content: &[u8]) -> String {
    match mime_guess::from_path(name).first() {
        Some(guess) => {
            let textual = guess.type_() == mime::TEXT || guess.subtype() == mime::JAVASCRIPT;
            if textual && guess.get_param(mime::CHARSET).is_none() {
                format!("{guess}; charset=utf-8")
            } else {
                guess.to_string()
            }
        }
        None if std::str::from_utf8(content).is_ok() => "text/plain; charset=utf-8".to_string(),
        None => "application/octet-stream".to_string(),
    }
}

fn directory_listing(entries: &[DirEntry]) -> Response {
    let mut html = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for entry in entries {
        let mut name = entry.name.clone();
        if entry.is_dir {
            name.push(b'/');
        }
        let mut href = encode_path(&name);
        // `a:b` would otherwise be read as a URL scheme.
        if name
            .split(|b| *b == b'/')
            .next()
            .is_some_and(|first| first.contains(&b':'))
        {
            href.insert_str(0, "./");
        }
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            escape_html(&href),
            escape_html(&String::from_utf8_lossy(&name))
        ));
    }
    html.push_str("</pre>\n");
    Response::new(StatusCode::OK, "text/html; charset=utf-8", html)
}

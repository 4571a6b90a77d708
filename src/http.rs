//! Minimal HTTP/1.1 request parsing and response writing.
//!
//! One request is read per connection and every response is sent with
//! `Connection: close`.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;
use std::io::{self, BufRead, Read, Write};
use std::time::SystemTime;

const MAX_LINE_LEN: u64 = 8 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_DRAINED_BODY: u64 = 1024 * 1024;

/// Characters escaped when a path is placed in a URL or `Location` header.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("connection closed before a request was received")]
    Closed,
    #[error("IO failed: `{0}`")]
    Io(#[from] io::Error),
    #[error("malformed request line: `{0}`")]
    RequestLine(String),
    #[error("malformed header: `{0}`")]
    Header(String),
    #[error("more than {} headers", MAX_HEADERS)]
    TooManyHeaders,
    #[error("line longer than {} bytes", MAX_LINE_LEN)]
    LineTooLong,
    #[error("malformed chunk: `{0}`")]
    Chunk(String),
    #[error("unsupported transfer encoding: `{0}`")]
    TransferEncoding(String),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path. Not necessarily UTF-8: file names are bytes.
    pub path: Vec<u8>,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl Request {
    /// Builds a request from an origin-form target such as `/a%20b?x=1`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: percent_decode_str(path).collect(),
            query,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    pub fn header(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Appends the query string, if any, to `location`.
    pub fn keep_query(&self, location: &str) -> String {
        match &self.query {
            Some(query) => format!("{location}?{query}"),
            None => location.to_string(),
        }
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, RequestError> {
    let mut buf = Vec::new();
    let n = reader.by_ref().take(MAX_LINE_LEN).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\n") {
        return Err(if n as u64 >= MAX_LINE_LEN {
            RequestError::LineTooLong
        } else {
            io::Error::from(io::ErrorKind::UnexpectedEof).into()
        });
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads one request head and discards its body.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Request, RequestError> {
    let mut line = read_line(reader)?.ok_or(RequestError::Closed)?;
    // Tolerate a stray CRLF left behind by a previous request.
    if line.is_empty() {
        line = read_line(reader)?.ok_or(RequestError::Closed)?;
    }

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::RequestLine(line.clone()));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(RequestError::RequestLine(line.clone()));
    }

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| RequestError::RequestLine(line.clone()))?;
    let uri: Uri = target
        .parse()
        .map_err(|_| RequestError::RequestLine(line.clone()))?;
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut request = Request::new(method, target);

    loop {
        let header_line = read_line(reader)?
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        if header_line.is_empty() {
            break;
        }
        if request.headers.len() >= MAX_HEADERS {
            return Err(RequestError::TooManyHeaders);
        }

        let (name, value) = header_line
            .split_once(':')
            .ok_or_else(|| RequestError::Header(header_line.clone()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| RequestError::Header(header_line.clone()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| RequestError::Header(header_line.clone()))?;
        request.headers.append(name, value);
    }

    drain_body(reader, &request.headers)?;
    Ok(request)
}

// Unread request bodies make the peer see a reset instead of our response.
fn drain_body<R: BufRead>(reader: &mut R, headers: &HeaderMap) -> Result<(), RequestError> {
    // Transfer-Encoding overrides Content-Length.
    if let Some(value) = headers.get(header::TRANSFER_ENCODING) {
        let encoding = value
            .to_str()
            .map_err(|_| RequestError::TransferEncoding(format!("{value:?}")))?;
        let chunked = encoding
            .rsplit(',')
            .next()
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
        if !chunked {
            return Err(RequestError::TransferEncoding(encoding.to_string()));
        }
        return drain_chunked(reader);
    }

    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if length > 0 {
        io::copy(
            &mut reader.by_ref().take(length.min(MAX_DRAINED_BODY)),
            &mut io::sink(),
        )?;
    }
    Ok(())
}

fn drain_chunked<R: BufRead>(reader: &mut R) -> Result<(), RequestError> {
    let eof = || RequestError::Io(io::ErrorKind::UnexpectedEof.into());
    let mut drained: u64 = 0;
    loop {
        let line = read_line(reader)?.ok_or_else(eof)?;
        let digits = line.split(';').next().unwrap_or("").trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RequestError::Chunk(line));
        }
        let size = u64::from_str_radix(digits, 16).map_err(|_| RequestError::Chunk(line.clone()))?;
        if size == 0 {
            break;
        }

        drained = drained.saturating_add(size);
        if drained > MAX_DRAINED_BODY {
            log::debug!("Giving up on a chunked body after {} bytes", MAX_DRAINED_BODY);
            return Ok(());
        }
        let copied = io::copy(&mut reader.by_ref().take(size), &mut io::sink())?;
        if copied < size {
            return Err(eof());
        }
        match read_line(reader)? {
            Some(end) if end.is_empty() => {}
            Some(end) => return Err(RequestError::Chunk(end)),
            None => return Err(eof()),
        }
    }

    // Trailer fields, up to the closing empty line.
    while let Some(line) = read_line(reader)? {
        if line.is_empty() {
            return Ok(());
        }
    }
    Err(eof())
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header_value(content_type));
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Plain text error in the conventional `<code> <reason>` form.
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", format!("{message}\n"))
            .with_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
    }

    pub fn not_found() -> Self {
        Self::error(StatusCode::NOT_FOUND, "404 page not found")
    }

    pub fn forbidden() -> Self {
        Self::error(StatusCode::FORBIDDEN, "403 Forbidden")
    }

    pub fn internal_error() -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
    }

    pub fn bad_request() -> Self {
        Self::error(StatusCode::BAD_REQUEST, "400 Bad Request")
    }

    /// `301 Moved Permanently` to an already encoded location.
    pub fn redirect(location: &str) -> Self {
        let body = format!(
            "<a href=\"{}\">Moved Permanently</a>.\n",
            escape_html(location)
        );
        Self::new(StatusCode::MOVED_PERMANENTLY, "text/html; charset=utf-8", body)
            .with_header(header::LOCATION, location)
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        self.headers.append(name, header_value(value));
        self
    }

    fn body_allowed(&self) -> bool {
        !(self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED)
    }

    /// Serialises the response. `head_only` keeps the headers of a HEAD
    /// response identical to the GET one while sending no body.
    pub fn write_to<W: Write>(&self, mut writer: W, head_only: bool) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        )
        .into_bytes();
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        let body_allowed = self.body_allowed();
        if body_allowed && !self.headers.contains_key(header::CONTENT_LENGTH) {
            head.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        }
        if !self.headers.contains_key(header::DATE) {
            head.extend_from_slice(
                format!("date: {}\r\n", httpdate::fmt_http_date(SystemTime::now())).as_bytes(),
            );
        }
        head.extend_from_slice(b"connection: close\r\n\r\n");

        writer.write_all(&head)?;
        if body_allowed && !head_only {
            writer.write_all(&self.body)?;
        }
        writer.flush()
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| {
        log::warn!("Dropping invalid header value: {:?}", value);
        HeaderValue::from_static("")
    })
}

/// Resolves `.` and `..` segments of a rooted slash path.
pub fn clean_path(path: &[u8]) -> Vec<u8> {
    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in path.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return b"/".to_vec();
    }
    let mut cleaned = Vec::with_capacity(path.len() + 1);
    for segment in segments {
        cleaned.push(b'/');
        cleaned.extend_from_slice(segment);
    }
    cleaned
}

/// Like [`clean_path`] but keeps a meaningful trailing slash.
pub fn canonical_path(path: &[u8]) -> Vec<u8> {
    let mut cleaned = clean_path(path);
    if path.ends_with(b"/") && cleaned != b"/" {
        cleaned.push(b'/');
    }
    cleaned
}

/// Last element of a slash path, ignoring trailing slashes.
pub fn base_name(path: &[u8]) -> &[u8] {
    let end = path.iter().rposition(|&b| b != b'/').map_or(0, |i| i + 1);
    let trimmed = &path[..end];
    match trimmed.iter().rposition(|&b| b == b'/') {
        Some(i) => &trimmed[i + 1..],
        None if trimmed.is_empty() => &b"/"[..],
        None => trimmed,
    }
}

pub fn encode_path(path: &[u8]) -> String {
    percent_encode(path, PATH).to_string()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use rstest::rstest;
    use std::io::{BufReader, Cursor};

    fn parse(raw: &str) -> Result<Request, RequestError> {
        read_request(&mut BufReader::new(Cursor::new(raw.as_bytes().to_vec())))
    }

    #[test]
    fn a_request_head_is_parsed() -> Result<()> {
        let request = parse(
            "GET /a%20b/c.txt?x=1&y=2 HTTP/1.1\r\nHost: example.com\r\nOrigin: http://a.test\r\n\r\n",
        )?;

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, b"/a b/c.txt");
        assert_eq!(request.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(request.header(header::HOST), Some("example.com"));
        assert_eq!(request.header(header::ORIGIN), Some("http://a.test"));
        Ok(())
    }

    #[test]
    fn an_absolute_form_target_keeps_only_its_path() -> Result<()> {
        let request = parse("GET http://example.com/x/y HTTP/1.1\r\n\r\n")?;
        assert_eq!(request.path, b"/x/y");
        Ok(())
    }

    #[test]
    fn a_body_is_drained() -> Result<()> {
        let raw = "POST /form HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(Cursor::new(raw.as_bytes().to_vec()));
        let request = read_request(&mut reader)?;

        assert_eq!(request.method, Method::POST);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        assert!(rest.is_empty());
        Ok(())
    }

    #[rstest]
    #[case::single_chunk("5\r\nhello\r\n0\r\n\r\n")]
    #[case::extensions("5;name=x\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")]
    #[case::trailers("5\r\nhello\r\n0\r\nExpires: never\r\n\r\n")]
    fn a_chunked_body_is_drained(#[case] body: &str) -> Result<()> {
        let raw = format!("POST /form HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n{body}");
        let mut reader = BufReader::new(Cursor::new(raw.into_bytes()));
        let request = read_request(&mut reader)?;

        assert_eq!(request.path, b"/form");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        assert!(rest.is_empty());
        Ok(())
    }

    #[rstest]
    #[case::bad_size("zz\r\nhello\r\n0\r\n\r\n")]
    #[case::missing_crlf("5\r\nhelloXX\r\n0\r\n\r\n")]
    fn a_malformed_chunk_is_rejected(#[case] body: &str) {
        let raw = format!("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n{body}");
        assert!(matches!(parse(&raw), Err(RequestError::Chunk(_))));
    }

    #[test]
    fn a_truncated_chunked_body_is_an_io_error() {
        let raw = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel";
        assert!(matches!(parse(raw), Err(RequestError::Io(_))));
    }

    #[test]
    fn a_body_of_unknown_length_is_rejected() {
        let raw = "POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n";
        assert!(matches!(parse(raw), Err(RequestError::TransferEncoding(_))));
    }

    #[test]
    fn paths_decode_to_raw_bytes() {
        let request = Request::new(Method::GET, "/caf%E9.txt?q=%FF");

        assert_eq!(request.path, b"/caf\xe9.txt");
        assert_eq!(request.path_lossy(), "/caf\u{fffd}.txt");
        assert_eq!(request.query.as_deref(), Some("q=%FF"));
    }

    #[rstest]
    #[case::missing_version("GET /\r\n\r\n")]
    #[case::extra_token("GET / HTTP/1.1 x\r\n\r\n")]
    #[case::wrong_protocol("GET / SPDY/3\r\n\r\n")]
    #[case::bad_header("GET / HTTP/1.1\r\nno colon here\r\n\r\n")]
    #[case::unterminated_head("GET / HTTP/1.1\r\nHost: x\r\n")]
    fn malformed_requests_are_rejected(#[case] raw: &str) {
        assert!(parse(raw).is_err());
    }

    #[test]
    fn an_empty_connection_is_reported_as_closed() {
        assert!(matches!(parse(""), Err(RequestError::Closed)));
    }

    #[test]
    fn a_response_is_serialised() -> Result<()> {
        let mut buf = Vec::new();
        Response::new(StatusCode::OK, "text/plain", "hello").write_to(&mut buf, false)?;
        let text = String::from_utf8(buf)?;

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
        Ok(())
    }

    #[test]
    fn a_head_response_has_no_body() -> Result<()> {
        let mut buf = Vec::new();
        Response::new(StatusCode::OK, "text/plain", "hello").write_to(&mut buf, true)?;
        let text = String::from_utf8(buf)?;

        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        Ok(())
    }

    #[test]
    fn no_content_never_carries_a_body() -> Result<()> {
        let mut buf = Vec::new();
        Response::new(StatusCode::NO_CONTENT, "text/plain", "ignored").write_to(&mut buf, false)?;
        let text = String::from_utf8(buf)?;

        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n"));
        Ok(())
    }

    #[test]
    fn an_unusual_status_is_written_without_a_reason() -> Result<()> {
        let mut buf = Vec::new();
        Response::new(StatusCode::from_u16(299)?, "text/plain", "").write_to(&mut buf, false)?;
        assert!(String::from_utf8(buf)?.starts_with("HTTP/1.1 299 \r\n"));
        Ok(())
    }

    #[rstest]
    #[case("", "/")]
    #[case("/", "/")]
    #[case("/a/b/../c", "/a/c")]
    #[case("/../../etc/passwd", "/etc/passwd")]
    #[case("a//b/./c/", "/a/b/c")]
    fn paths_are_cleaned(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean_path(input.as_bytes()), expected.as_bytes());
    }

    #[rstest]
    #[case("/a/b/", "/a/b/")]
    #[case("/a/../", "/")]
    #[case("/a//b", "/a/b")]
    fn canonical_paths_keep_their_trailing_slash(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(canonical_path(input.as_bytes()), expected.as_bytes());
    }

    #[rstest]
    #[case("/a/b.txt", "b.txt")]
    #[case("/a/dir/", "dir")]
    #[case("/", "/")]
    #[case("name", "name")]
    fn base_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(base_name(input.as_bytes()), expected.as_bytes());
    }

    #[test]
    fn paths_and_html_are_escaped() {
        assert_eq!(encode_path(b"/a b/100%.txt"), "/a%20b/100%25.txt");
        assert_eq!(encode_path("/é".as_bytes()), "/%C3%A9");
        assert_eq!(encode_path(b"/caf\xe9"), "/caf%E9");
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&#34;x&#34;&gt;&amp;&#39;");
    }
}

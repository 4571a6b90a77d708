use http::Method;

use super::Handler;
use crate::http::{canonical_path, encode_path, Request, Response};

/// Routes requests under a single path pattern to `inner`.
///
/// A pattern ending in `/` covers its whole subtree, any other pattern
/// matches only itself. Non-canonical paths are redirected to their cleaned
/// form before matching.
#[derive(Debug, Clone)]
pub struct Mount<H> {
    pattern: String,
    inner: H,
}

impl<H: Handler> Mount<H> {
    pub fn new(pattern: &str, inner: H) -> Self {
        let mut pattern = pattern.to_string();
        if !pattern.starts_with('/') {
            pattern.insert(0, '/');
        }
        Self { pattern, inner }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, path: &[u8]) -> bool {
        if self.pattern.ends_with('/') {
            path.starts_with(self.pattern.as_bytes())
        } else {
            path == self.pattern.as_bytes()
        }
    }
}

impl<H: Handler> Handler for Mount<H> {
    fn serve(&self, request: &Request) -> Response {
        if request.method != Method::CONNECT {
            let canonical = canonical_path(&request.path);
            if canonical != request.path {
                return Response::redirect(&request.keep_query(&encode_path(&canonical)));
            }
        }

        if self.matches(&request.path) {
            return self.inner.serve(request);
        }

        if self.pattern.len() > 1
            && self.pattern.trim_end_matches('/').as_bytes() == request.path.as_slice()
        {
            return Response::redirect(&request.keep_query(&encode_path(self.pattern.as_bytes())));
        }

        Response::not_found()
    }
}

/// Removes a fixed prefix from the request path before calling `inner`.
#[derive(Debug, Clone)]
pub struct StripPrefix<H> {
    prefix: String,
    inner: H,
}

impl<H: Handler> StripPrefix<H> {
    pub fn new(prefix: &str, inner: H) -> Self {
        Self {
            prefix: prefix.to_string(),
            inner,
        }
    }
}

impl<H: Handler> Handler for StripPrefix<H> {
    fn serve(&self, request: &Request) -> Response {
        match request.path.strip_prefix(self.prefix.as_bytes()) {
            Some(rest) => {
                let mut stripped = request.clone();
                stripped.path = rest.to_vec();
                self.inner.serve(&stripped)
            }
            None => Response::not_found(),
        }
    }
}

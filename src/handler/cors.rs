//! Cross-origin resource sharing.
//!
//! Preflight requests are answered here and never reach the wrapped
//! handler. Actual requests always run the wrapped handler; CORS headers
//! are added only when the origin and method are allowed.

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::{Method, StatusCode};

use super::Handler;
use crate::http::{Request, Response};

const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::DELETE,
    Method::PUT,
    Method::PATCH,
];

const ALLOWED_HEADERS: [&str; 8] = [
    "accept",
    "access-token",
    "authorization",
    "content-type",
    "version",
    "x-api-key",
    "origin",
    "recaptcha-token",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Any,
    Exact(String),
    /// A single `*` between a prefix and a suffix, e.g. `https://*.example.com`.
    Wildcard { prefix: String, suffix: String },
}

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origin: OriginRule,
    allow_credentials: bool,
}

impl CorsPolicy {
    pub fn new(origin: &str) -> Self {
        let origin = origin.trim().to_lowercase();
        let rule = if origin == "*" {
            OriginRule::Any
        } else if let Some((prefix, suffix)) = origin.split_once('*') {
            OriginRule::Wildcard {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }
        } else {
            OriginRule::Exact(origin)
        };
        Self {
            origin: rule,
            allow_credentials: true,
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.to_lowercase();
        match &self.origin {
            OriginRule::Any => true,
            OriginRule::Exact(allowed) => *allowed == origin,
            OriginRule::Wildcard { prefix, suffix } => {
                origin.len() >= prefix.len() + suffix.len()
                    && origin.starts_with(prefix.as_str())
                    && origin.ends_with(suffix.as_str())
            }
        }
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        let method = method.to_uppercase();
        // Preflights themselves are always acceptable.
        method == Method::OPTIONS.as_str() || ALLOWED_METHODS.iter().any(|m| m.as_str() == method)
    }

    pub fn are_headers_allowed(&self, requested: &str) -> bool {
        requested
            .split(',')
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .all(|h| ALLOWED_HEADERS.contains(&h.as_str()))
    }

    fn allow_origin_value<'a>(&self, origin: &'a str) -> &'a str {
        match self.origin {
            OriginRule::Any => "*",
            _ => origin,
        }
    }

    fn preflight(&self, request: &Request) -> Response {
        let mut response = Response {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
        .with_header(header::VARY, "Origin")
        .with_header(header::VARY, "Access-Control-Request-Method")
        .with_header(header::VARY, "Access-Control-Request-Headers");

        let origin = request.header(header::ORIGIN).unwrap_or("");
        if origin.is_empty() {
            log::debug!("Preflight aborted: empty origin");
            return response;
        }
        if !self.is_origin_allowed(origin) {
            log::debug!("Preflight aborted: origin `{}` not allowed", origin);
            return response;
        }

        let method = request
            .header(header::ACCESS_CONTROL_REQUEST_METHOD)
            .unwrap_or("");
        if !self.is_method_allowed(method) {
            log::debug!("Preflight aborted: method `{}` not allowed", method);
            return response;
        }

        let requested_headers = request
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .unwrap_or("");
        if !self.are_headers_allowed(requested_headers) {
            log::debug!("Preflight aborted: headers `{}` not allowed", requested_headers);
            return response;
        }

        response = response
            .with_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin_value(origin))
            .with_header(header::ACCESS_CONTROL_ALLOW_METHODS, &method.to_uppercase());
        if !requested_headers.trim().is_empty() {
            response = response.with_header(header::ACCESS_CONTROL_ALLOW_HEADERS, requested_headers);
        }
        if self.allow_credentials {
            response = response.with_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }
        response
    }

    fn decorate(&self, request: &Request, mut response: Response) -> Response {
        response = response.with_header(header::VARY, "Origin");

        let Some(origin) = request.header(header::ORIGIN).filter(|o| !o.is_empty()) else {
            return response;
        };
        if !self.is_origin_allowed(origin) {
            log::debug!("Actual request: origin `{}` not allowed", origin);
            return response;
        }
        if !self.is_method_allowed(request.method.as_str()) {
            log::debug!("Actual request: method `{}` not allowed", request.method);
            return response;
        }

        response = response.with_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin_value(origin));
        if self.allow_credentials {
            response = response.with_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }
        response
    }
}

/// Applies a [`CorsPolicy`] around another handler.
#[derive(Debug, Clone)]
pub struct Cors<H> {
    policy: CorsPolicy,
    inner: H,
}

impl<H: Handler> Cors<H> {
    pub fn new(origin: &str, inner: H) -> Self {
        Self {
            policy: CorsPolicy::new(origin),
            inner,
        }
    }
}

impl<H: Handler> Handler for Cors<H> {
    fn serve(&self, request: &Request) -> Response {
        if request.method == Method::OPTIONS
            && request.headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
        {
            return self.policy.preflight(request);
        }
        let response = self.inner.serve(request);
        self.policy.decorate(request, response)
    }
}

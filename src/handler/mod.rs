//! Request handlers and the middleware that wraps them.

pub mod body;
pub mod cors;
pub mod file_server;
pub mod prefix;

pub use body::BodyResponder;
pub use cors::{Cors, CorsPolicy};
pub use file_server::FileServer;
pub use prefix::{Mount, StripPrefix};

use std::sync::Arc;

use crate::http::{Request, Response};

pub trait Handler: Send + Sync {
    fn serve(&self, request: &Request) -> Response;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn serve(&self, request: &Request) -> Response {
        (**self).serve(request)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn serve(&self, request: &Request) -> Response {
        (**self).serve(request)
    }
}

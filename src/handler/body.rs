use bytes::Bytes;
use http::StatusCode;

use super::Handler;
use crate::http::{Request, Response};

pub const CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Answers every request with the same body and status.
#[derive(Debug, Clone)]
pub struct BodyResponder {
    body: Bytes,
    status: StatusCode,
}

impl BodyResponder {
    pub fn new(body: impl Into<Bytes>, status: StatusCode) -> Self {
        Self {
            body: body.into(),
            status,
        }
    }
}

impl Handler for BodyResponder {
    fn serve(&self, _request: &Request) -> Response {
        Response::new(self.status, CONTENT_TYPE, self.body.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use http::{header, Method};
    use rstest::rstest;

    #[rstest]
    #[case(Method::GET, "/")]
    #[case(Method::POST, "/anything/else")]
    #[case(Method::DELETE, "/x?y=z")]
    fn every_request_gets_the_same_body(#[case] method: Method, #[case] target: &str) {
        let responder = BodyResponder::new(&b"<h1>hi</h1>"[..], StatusCode::IM_A_TEAPOT);

        let response = responder.serve(&Request::new(method, target));

        assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers[header::CONTENT_TYPE], CONTENT_TYPE);
        assert_eq!(&response.body[..], b"<h1>hi</h1>");
    }

    #[test]
    fn an_empty_body_is_served_as_is() {
        let responder = BodyResponder::new(String::new(), StatusCode::OK);
        let response = responder.serve(&Request::new(Method::GET, "/"));

        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
    }
}

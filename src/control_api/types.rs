//! Response helpers and error shapes for the control plane.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Error document returned by the control plane.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Shape errors: unparseable or undeserialisable request documents.
pub const INCORRECT_FORMAT: &str = "incorrect request format";
/// Semantic errors: documents that parse but fail the admission gate.
pub const INVALID_EXPECTATION: &str = "invalid expectation";

/// Serialise a value as a pretty-printed JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("content-type", "application/json")], json)
}

pub fn error_response(
    status: StatusCode,
    error: &'static str,
    message: impl Into<String>,
) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorBody {
            error,
            message: message.into(),
        },
    )
}

pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    build_response(status, Bytes::new())
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, INCORRECT_FORMAT, "not found")
}

/// Build a response, defending against the unlikely builder failure.
pub fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("internal server error"))))
}

pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder.body(Full::new(body.into())).unwrap_or_else(|_| {
        Response::new(Full::new(Bytes::from("internal server error")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_shape() {
        let response = error_response(StatusCode::BAD_REQUEST, INCORRECT_FORMAT, "oops");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn empty_response_has_no_body() {
        let response = empty_response(StatusCode::NO_CONTENT);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

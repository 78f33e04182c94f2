//! What handlers return: a [`Reply`] on success, an [`HttpError`] to short-circuit.

use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use super::response::BodyStream;
use super::{BodyError, Headers, Method, Response, StatusCode};

/// The result type every HTTP handler produces.
pub type HandlerResult = Result<Reply, HttpError>;

/// A handler's successful result.
///
/// Each variant maps to one way of building a [`Response`]; conversions exist
/// from the common payload types so handlers can write `Ok("hi".into())`.
pub enum Reply {
    /// `application/octet-stream`.
    Bytes(Bytes),
    /// `text/plain; charset=utf-8`.
    Text(String),
    /// `application/json`.
    Json(serde_json::Value),
    /// A fully built response, sent as is.
    Response(Response),
    /// A lazily produced body, sent with chunked framing.
    Stream(BodyStream),
}

impl Reply {
    /// Wraps a chunk stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        Reply::Stream(Box::pin(stream))
    }

    /// Status the reply will be sent with.
    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Response(response) => response.status(),
            _ => StatusCode::Ok,
        }
    }

    /// Builds the wire response.
    pub fn into_response(self) -> Response {
        match self {
            Reply::Bytes(body) => Response::new(StatusCode::Ok)
                .header("Content-Type", "application/octet-stream")
                .body_bytes(body),
            Reply::Text(body) => Response::text(body),
            Reply::Json(value) => Response::new(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(value.to_string()),
            Reply::Response(response) => response,
            Reply::Stream(stream) => Response::stream(stream),
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Reply::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Reply::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Reply::Response(r) => f.debug_tuple("Response").field(&r.status()).finish(),
            Reply::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<&'static str> for Reply {
    fn from(text: &'static str) -> Self {
        Reply::Text(text.to_owned())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<Bytes> for Reply {
    fn from(body: Bytes) -> Self {
        Reply::Bytes(body)
    }
}

impl From<Vec<u8>> for Reply {
    fn from(body: Vec<u8>) -> Self {
        Reply::Bytes(body.into())
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Reply::Json(value)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

/// An HTTP-level failure a handler (or the router) reports instead of a reply.
///
/// Returning one short-circuits the handler; the connection turns it into a
/// response through the server's error hook or [`HttpError::into_response`].
#[derive(Debug, Clone, Error)]
#[error("{status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct HttpError {
    pub status: StatusCode,
    pub message: Option<String>,
    pub headers: Headers,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound)
    }

    /// 405 carrying an `Allow` header built from `allowed`.
    pub fn method_not_allowed(allowed: &[Method]) -> Self {
        let allow = allowed
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(StatusCode::MethodNotAllowed).header("Allow", allow)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest).with_message(message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalServerError).with_message(message)
    }

    /// Default rendering: the message (or the reason phrase) as plain text.
    pub fn into_response(self) -> Response {
        let body = self
            .message
            .unwrap_or_else(|| self.status.canonical_reason().to_owned());

        let mut response = Response::new(self.status).body(body);
        for (name, value) in self.headers.iter() {
            response.add_header(name, value);
        }
        response
    }
}

impl From<BodyError> for HttpError {
    fn from(err: BodyError) -> Self {
        HttpError::bad_request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_pick_content_types() {
        let r = Reply::from("hi").into_response();
        assert_eq!(r.headers().get("content-type"), Some("text/plain; charset=utf-8"));

        let r = Reply::from(vec![1u8, 2, 3]).into_response();
        assert_eq!(r.headers().get("content-type"), Some("application/octet-stream"));

        let r = Reply::from(serde_json::json!([1, 2])).into_response();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.body_ref().map(|b| &b[..]), Some(&b"[1,2]"[..]));

        let r = Reply::from(Response::new(StatusCode::Created)).into_response();
        assert_eq!(r.status(), StatusCode::Created);

        let r = Reply::stream(futures_util::stream::empty::<Bytes>()).into_response();
        assert!(r.is_stream());
    }

    #[test]
    fn method_not_allowed_lists_methods() {
        let err = HttpError::method_not_allowed(&[Method::Get, Method::Post]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert_eq!(response.headers().get("allow"), Some("GET, POST"));
        assert_eq!(
            response.body_ref().map(|b| &b[..]),
            Some(&b"Method Not Allowed"[..])
        );
    }

    #[test]
    fn display_includes_message() {
        assert_eq!(HttpError::not_found().to_string(), "404 Not Found");
        assert_eq!(
            HttpError::bad_request("missing id").to_string(),
            "400 Bad Request: missing id"
        );
    }
}

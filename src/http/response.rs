//! HTTP/1.1 response builder and encoder.
//!
//! A response carries either an in-memory body, framed with `Content-Length`,
//! or a lazily produced stream of chunks, framed with
//! `Transfer-Encoding: chunked` so the connection stays reusable afterwards.

use std::fmt;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use super::{CacheControl, Headers, StatusCode};
use crate::stream::{StreamError, StreamWriter};

/// A lazily produced response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

enum Payload {
    Full(Bytes),
    Stream(BodyStream),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Full(body) => f.debug_tuple("Full").field(&body.len()).finish(),
            Payload::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// An HTTP/1.1 response, ready to be encoded and sent.
///
/// # Examples
///
/// ```
/// use switchyard::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    payload: Payload,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            payload: Payload::Full(Bytes::new()),
            keep_alive: true,
        }
    }

    /// `200 OK` with a `text/plain` body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(StatusCode::Ok)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
    }

    /// `200 OK` with a `text/html` body.
    pub fn html(body: impl Into<String>) -> Self {
        Self::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(body)
    }

    /// `200 OK` with `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body_bytes(body))
    }

    /// A redirect to `location` with the given 3xx status.
    pub fn redirect(location: impl Into<String>, status: StatusCode) -> Self {
        Self::new(status).header("Location", location)
    }

    /// `200 OK` whose body is produced chunk by chunk from `stream`.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        let mut response = Self::new(StatusCode::Ok);
        response.payload = Payload::Stream(Box::pin(stream));
        response
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(self, body: impl Into<String>) -> Self {
        self.body_bytes(body.into())
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.payload = Payload::Full(body.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub(crate) fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The in-memory body, or `None` for a streamed response.
    pub fn body_ref(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Full(body) => Some(body),
            Payload::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.payload, Payload::Stream(_))
    }

    /// Adds the `Date` and `Server` headers unless the handler set them.
    pub fn finalize(&mut self, server_name: &str) {
        if !self.headers.contains("date") {
            self.headers
                .insert("Date", httpdate::fmt_http_date(SystemTime::now()));
        }
        if !self.headers.contains("server") {
            self.headers.insert("Server", server_name);
        }
    }

    /// Applies route cache metadata unless the handler set `Cache-Control`.
    pub fn apply_cache_control(&mut self, control: &CacheControl) {
        if !control.is_empty() && !self.headers.contains("cache-control") {
            self.headers.insert("Cache-Control", control.to_string());
        }
    }

    fn encode_head(&mut self, buf: &mut BytesMut) {
        match &self.payload {
            Payload::Full(body) => {
                if self.status.allows_body() {
                    if !body.is_empty() && !self.headers.contains("content-type") {
                        self.headers
                            .insert("Content-Type", "text/plain; charset=utf-8");
                    }
                    self.headers.set("Content-Length", body.len().to_string());
                }
            }
            Payload::Stream(_) => {
                self.headers.remove("content-length");
                self.headers.set("Transfer-Encoding", "chunked");
            }
        }

        if !self.headers.contains("connection") {
            let connection = if self.keep_alive {
                "keep-alive"
            } else {
                "close"
            };
            self.headers.insert("Connection", connection);
        }

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        self.headers.encode(buf);
        buf.put(&b"\r\n"[..]);
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` for statuses that carry a body.
    /// - `Connection: keep-alive` or `Connection: close`, unless already set.
    ///
    /// A streamed body is not polled here; only its head is encoded.
    pub fn into_bytes(mut self) -> BytesMut {
        let body_len = self.body_ref().map_or(0, Bytes::len);
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + body_len);
        self.encode_head(&mut buf);

        if let Payload::Full(body) = &self.payload {
            if self.status.allows_body() {
                buf.put(body.as_ref());
            }
        }
        buf
    }

    /// Encodes the response onto `writer`.
    ///
    /// Streamed chunks are written as they are produced, each followed by a
    /// drain so a slow peer applies backpressure to the producer. With
    /// `head_only` (responses to `HEAD`) the body is skipped.
    pub async fn write_to(mut self, writer: &StreamWriter, head_only: bool) -> Result<(), StreamError> {
        let mut head = BytesMut::with_capacity(256);
        self.encode_head(&mut head);

        let skip_body = head_only || !self.status.allows_body();
        match self.payload {
            Payload::Full(body) => {
                writer.write(head.freeze())?;
                if !skip_body {
                    writer.write(body)?;
                }
                writer.drain(None).await
            }
            Payload::Stream(mut stream) => {
                writer.write_and_drain(head.freeze(), None).await?;
                if skip_body {
                    return Ok(());
                }

                while let Some(chunk) = stream.next().await {
                    if chunk.is_empty() {
                        continue;
                    }
                    writer.write(format!("{:x}\r\n", chunk.len()))?;
                    writer.write(chunk)?;
                    writer.write_and_drain(&b"\r\n"[..], None).await?;
                }
                writer.write_and_drain(&b"0\r\n\r\n"[..], None).await
            }
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{TransportOptions, open};

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::Ok)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        let s = to_string(r.into_bytes());
        assert!(s.contains("X-Request-Id: abc-123\r\n"));
    }

    #[test]
    fn no_content_has_no_length_or_type() {
        let r = Response::new(StatusCode::NoContent);
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::Ok).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn explicit_connection_header_is_kept() {
        let r = Response::new(StatusCode::SwitchingProtocols).header("Connection", "Upgrade");
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: Upgrade\r\n"));
        assert!(!s.contains("keep-alive"));
    }

    #[test]
    fn json_and_redirect_builders() {
        let r = Response::json(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.body_ref().map(|b| &b[..]), Some(&br#"{"ok":true}"#[..]));

        let r = Response::redirect("/login", StatusCode::SeeOther);
        assert_eq!(r.status(), StatusCode::SeeOther);
        assert_eq!(r.headers().get("location"), Some("/login"));
    }

    #[test]
    fn finalize_only_fills_missing_headers() {
        let mut r = Response::text("hi").header("Server", "custom");
        r.finalize("switchyard");
        r.finalize("switchyard");

        assert_eq!(r.headers().get_all("server").count(), 1);
        assert_eq!(r.headers().get("server"), Some("custom"));
        assert_eq!(r.headers().get_all("date").count(), 1);
        let date = r.headers().get("date").unwrap();
        assert!(httpdate::parse_http_date(date).is_ok());
    }

    #[test]
    fn cache_control_does_not_override_handler() {
        let control = CacheControl::new().max_age(60);

        let mut r = Response::text("a");
        r.apply_cache_control(&control);
        assert_eq!(r.headers().get("cache-control"), Some("max-age=60"));

        let mut r = Response::text("a").header("Cache-Control", "no-store");
        r.apply_cache_control(&control);
        assert_eq!(r.headers().get("cache-control"), Some("no-store"));
    }

    #[tokio::test]
    async fn streamed_body_uses_chunked_framing() {
        let (client, server) = tokio::io::duplex(4096);
        let (_server_reader, writer) = open(server, TransportOptions::default());
        let (client_reader, _client_writer) = open(client, TransportOptions::default());

        let chunks = futures_util::stream::iter(vec![
            Bytes::from_static(b"hello"),
            Bytes::new(),
            Bytes::from_static(b", world"),
        ]);
        Response::stream(chunks).write_to(&writer, false).await.unwrap();
        writer.close();
        writer.wait_closed().await.unwrap();

        let raw = client_reader.read(None, None).await.unwrap();
        let mut all = raw.to_vec();
        while !client_reader.at_eof() || client_reader.buffered() > 0 {
            all.extend_from_slice(&client_reader.read(None, None).await.unwrap());
        }
        let text = String::from_utf8(all).unwrap();

        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn head_only_skips_body() {
        let (client, server) = tokio::io::duplex(4096);
        let (_server_reader, writer) = open(server, TransportOptions::default());
        let (client_reader, _client_writer) = open(client, TransportOptions::default());

        Response::text("payload").write_to(&writer, true).await.unwrap();
        writer.close();

        let head = client_reader.read_until(b"\r\n\r\n", true, None).await.unwrap();
        assert!(std::str::from_utf8(&head).unwrap().contains("Content-Length: 7\r\n"));
        assert!(client_reader.read(Some(1), None).await.is_err());
    }
}

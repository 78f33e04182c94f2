//! HTTP/1.1 request parsing over a buffered stream.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::{Body, Headers, Method};
use crate::stream::{StreamError, StreamReader};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default upper bound on a request head, terminator included.
pub const DEFAULT_MAX_HEAD_SIZE: usize = 64 * 1024;

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The request line did not split into exactly three space-separated fields.
    #[error("malformed request line: {0:?}")]
    MalformedStatusLine(String),

    #[error("unsupported HTTP method: {0:?}")]
    InvalidMethod(String),

    /// The version is well-formed but not one this server speaks. The
    /// connection answers with 505 before closing.
    #[error("unsupported HTTP version: {0:?}")]
    UnsupportedVersion(String),

    #[error("invalid request target: {0:?}")]
    InvalidTarget(String),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    /// No complete head within the configured limit.
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The body uses a transfer coding this server cannot decode.
    #[error("unsupported Transfer-Encoding: {0:?}")]
    UnsupportedTransferEncoding(String),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            other => Err(ParseError::UnsupportedVersion(other.to_owned())),
        }
    }
}

/// A parsed HTTP/1.1 request.
///
/// The head is parsed eagerly; the [`Body`] is read from the connection only
/// when a handler asks for it.
///
/// # Examples
///
/// ```
/// use switchyard::http::{Method, Request};
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::from_head(raw).unwrap();
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    version: Version,
    headers: Headers,
    query: Option<String>,
    params: HashMap<String, String>,
    body: Body,
}

impl Request {
    /// Reads one request head of at most `max_head` bytes from `reader` and
    /// attaches a lazy body.
    ///
    /// `timeout` bounds the wait for the complete head. Blank lines left over
    /// before the request line are skipped.
    ///
    /// # Errors
    ///
    /// - [`ParseError::Stream`] with a partial read when the peer closed before
    ///   a full head arrived, or [`StreamError::Timeout`].
    /// - [`ParseError::HeadTooLarge`] once `max_head` bytes arrived without a
    ///   blank line.
    /// - [`ParseError::UnsupportedTransferEncoding`] for any
    ///   `Transfer-Encoding` body, since only `Content-Length` framing is read.
    /// - Any other [`ParseError`] variant for a malformed head.
    pub async fn parse(
        reader: &StreamReader,
        max_head: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, ParseError> {
        let head = reader
            .read_until_limited(HEAD_TERMINATOR, false, max_head, timeout)
            .await
            .map_err(|err| match err {
                StreamError::LimitOverrun { limit } => ParseError::HeadTooLarge(limit),
                other => ParseError::Stream(other),
            })?;

        let mut request = Self::from_head(&head)?;
        if let Some(coding) = request.headers.get("transfer-encoding") {
            return Err(ParseError::UnsupportedTransferEncoding(coding.to_owned()));
        }
        if let Some(length) = request.content_length()? {
            request.body = Body::from_stream(reader.clone(), length);
        }
        Ok(request)
    }

    /// Parses a request head (request line and header block, with or without
    /// the trailing blank line). The body is empty.
    pub fn from_head(head: &[u8]) -> Result<Self, ParseError> {
        let text = String::from_utf8_lossy(head);
        let text = text.trim_start_matches(['\r', '\n']);
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let fields: Vec<&str> = request_line.split(' ').collect();
        let &[method, target, version] = &fields[..] else {
            return Err(ParseError::MalformedStatusLine(request_line.to_owned()));
        };

        let method: Method = method.parse()?;
        let version: Version = version.parse()?;

        if target.is_empty() {
            return Err(ParseError::InvalidTarget(target.to_owned()));
        }
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };

        let mut headers = Headers::new();
        for line in lines.filter(|line| !line.is_empty()) {
            // Lines without a colon are skipped rather than rejected.
            headers.push_line(line);
        }

        let params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Ok(Self {
            method,
            path,
            version,
            headers,
            query,
            params,
            body: Body::empty(),
        })
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the lazily read body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        match self.version {
            Version::Http11 => true,
            Version::Http10 => self.headers.has_token("connection", "keep-alive"),
        }
    }

    /// Returns the declared `Content-Length`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidContentLength`] when the header is not a
    /// non-negative integer.
    pub fn content_length(&self) -> Result<Option<usize>, ParseError> {
        self.headers
            .get("content-length")
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ParseError::InvalidContentLength(value.to_owned()))
            })
            .transpose()
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// `+` decodes to a space and `%XX` escapes are decoded; malformed escapes are
/// kept verbatim. The first occurrence of a key wins.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(percent_decode(key))
            .or_insert_with(|| percent_decode(value));
    }
    params
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => match (bytes.get(i + 1).and_then(hex), bytes.get(i + 2).and_then(hex)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex(digit: &u8) -> Option<u8> {
    (*digit as char).to_digit(16).map(|d| d as u8)
}

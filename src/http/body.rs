//! Lazily read request bodies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::stream::{StreamError, StreamReader};

/// Largest slice handed out by a single [`Body::chunk`] call.
const CHUNK_SIZE: usize = 64 * 1024;

/// Errors raised while consuming a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A request body, read from the connection on demand.
///
/// The length is taken from `Content-Length`; a request without that header
/// has an empty body. Nothing is read until one of the accessors is awaited,
/// and bytes a handler leaves unread are discarded by the connection before it
/// parses the next request.
///
/// Requests carrying `Transfer-Encoding` never get this far: the parser
/// rejects them and the connection answers 501.
///
// TODO: decode `Transfer-Encoding: chunked` request bodies instead of refusing them.
#[derive(Debug, Clone)]
pub struct Body {
    source: Option<StreamReader>,
    remaining: Arc<AtomicUsize>,
    length: usize,
}

impl Body {
    /// A body with no bytes.
    pub fn empty() -> Self {
        Self {
            source: None,
            remaining: Arc::new(AtomicUsize::new(0)),
            length: 0,
        }
    }

    pub(crate) fn from_stream(source: StreamReader, length: usize) -> Self {
        if length == 0 {
            return Self::empty();
        }
        Self {
            source: Some(source),
            remaining: Arc::new(AtomicUsize::new(length)),
            length,
        }
    }

    /// Declared length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Returns the next available slice of the body, or `None` once the body
    /// has been fully consumed.
    pub async fn chunk(&self) -> Result<Option<Bytes>, BodyError> {
        let remaining = self.remaining();
        let Some(source) = self.source.as_ref().filter(|_| remaining > 0) else {
            return Ok(None);
        };

        let data = source.read_at_most(remaining.min(CHUNK_SIZE), None).await?;
        if data.is_empty() {
            return Err(StreamError::PartialRead {
                partial: data,
                expected: Some(remaining),
            }
            .into());
        }

        self.remaining.fetch_sub(data.len(), Ordering::AcqRel);
        Ok(Some(data))
    }

    /// Reads the rest of the body.
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        let remaining = self.remaining();
        let Some(source) = self.source.as_ref().filter(|_| remaining > 0) else {
            return Ok(Bytes::new());
        };

        let data = source.read(Some(remaining), None).await;
        // On a partial read the stream is at EOF; nothing more will arrive.
        self.remaining.store(0, Ordering::Release);
        Ok(data?)
    }

    /// Reads the rest of the body as UTF-8 text.
    pub async fn text(&self) -> Result<String, BodyError> {
        let data = self.bytes().await?;
        Ok(String::from_utf8(data.to_vec())?)
    }

    /// Reads the rest of the body and deserializes it from JSON.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        let data = self.bytes().await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Consumes and drops whatever is left of the body.
    pub async fn discard(&self) -> Result<(), BodyError> {
        while self.chunk().await?.is_some() {}
        Ok(())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn body_of(data: &[u8], length: usize) -> (Body, StreamReader) {
        let reader = StreamReader::new();
        reader.feed(data).unwrap();
        (Body::from_stream(reader.clone(), length), reader)
    }

    #[tokio::test]
    async fn reads_only_declared_length() {
        let (body, reader) = body_of(b"helloGET /next", 5);
        assert_eq!(body.text().await.unwrap(), "hello");
        assert_eq!(body.remaining(), 0);
        assert_eq!(&reader.reset()[..], b"GET /next");
    }

    #[tokio::test]
    async fn chunks_until_exhausted() {
        let (body, _reader) = body_of(b"abcdef", 6);
        let mut collected = Vec::new();
        while let Some(chunk) = body.chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"abcdef");
        assert!(body.chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_body() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }

        let raw = br#"{"name":"switch"}"#;
        let (body, _reader) = body_of(raw, raw.len());
        let payload: Payload = body.json().await.unwrap();
        assert_eq!(payload.name, "switch");
    }

    #[tokio::test]
    async fn truncated_body_is_partial_read() {
        let (body, reader) = body_of(b"abc", 10);
        reader.feed_eof();
        assert!(matches!(
            body.bytes().await,
            Err(BodyError::Stream(StreamError::PartialRead { .. }))
        ));
    }

    #[tokio::test]
    async fn discard_leaves_following_bytes() {
        let (body, reader) = body_of(b"0123456789rest", 10);
        body.discard().await.unwrap();
        assert_eq!(&reader.reset()[..], b"rest");
    }

    #[tokio::test]
    async fn empty_body_never_touches_stream() {
        let body = Body::empty();
        assert!(body.is_empty());
        assert!(body.bytes().await.unwrap().is_empty());
        assert!(body.chunk().await.unwrap().is_none());
    }
}

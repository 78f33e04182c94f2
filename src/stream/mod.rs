//! Buffered byte streams bridging a raw transport and the protocol layers.
//!
//! A connection is split into a [`StreamReader`] and a [`StreamWriter`]:
//!
//! - The reader owns an append-only buffer that a transport pump feeds with
//!   [`StreamReader::feed`] / [`StreamReader::feed_eof`]. Protocol code awaits
//!   "N bytes" or "up to a delimiter" on top of it.
//! - The writer queues bytes for the transport without blocking and exposes
//!   backpressure through [`StreamWriter::drain`].
//!
//! [`open`] wires both halves to any `AsyncRead + AsyncWrite` value by spawning
//! the pump tasks.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

pub mod reader;
pub mod transport;
pub mod writer;

pub use reader::StreamReader;
pub use transport::{TransportOptions, open};
pub use writer::StreamWriter;

/// Errors produced by buffered stream operations.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// End of stream was reached before the read could be satisfied.
    ///
    /// `partial` holds every byte that was still buffered; `expected` is the
    /// requested length, or `None` for delimiter-bound reads.
    #[error("expected a total of {} bytes, but only got {}", display_expected(.expected), .partial.len())]
    PartialRead {
        partial: Bytes,
        expected: Option<usize>,
    },

    /// A wait exceeded its deadline. Buffered data is left untouched.
    #[error("timed out waiting on the stream")]
    Timeout,

    /// A delimiter-bound read buffered `limit` bytes without finding the
    /// delimiter. The buffer is left untouched.
    #[error("no delimiter within the first {limit} bytes")]
    LimitOverrun { limit: usize },

    /// Data was fed after end of stream had been signaled.
    #[error("cannot feed data after end of stream")]
    FeedAfterEof,

    /// The transport has been closed and no longer accepts writes.
    #[error("stream is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(Arc::new(err))
    }
}

impl StreamError {
    /// Returns `true` for a partial read that obtained no bytes at all, i.e. the
    /// peer closed the stream cleanly between messages.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, StreamError::PartialRead { partial, .. } if partial.is_empty())
    }
}

fn display_expected(expected: &Option<usize>) -> String {
    match expected {
        Some(n) => n.to_string(),
        None => "unspecified".to_owned(),
    }
}

//! Read side of a buffered stream.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::StreamError;

/// Append-only byte buffer with asynchronous "wait for more" semantics.
///
/// The transport feeds bytes in with [`feed`](Self::feed) and signals end of
/// stream with [`feed_eof`](Self::feed_eof). Consumers await exact lengths,
/// delimiters, or whatever is currently available.
///
/// At most one task may be suspended on a reader at a time. Registering a
/// second waiter while one is pending is a programming error and panics.
///
/// Clones share the same buffer.
///
/// # Examples
///
/// ```
/// use switchyard::stream::StreamReader;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let reader = StreamReader::new();
/// reader.feed(b"GET / HTTP/1.1\r\n").unwrap();
///
/// let line = reader.read_line(false, None).await.unwrap();
/// assert_eq!(&line[..], b"GET / HTTP/1.1\r");
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StreamReader {
    shared: Arc<Mutex<ReaderState>>,
}

#[derive(Debug, Default)]
struct ReaderState {
    buffer: BytesMut,
    eof: bool,
    // Bumped on every feed so a waiter can tell whether anything happened
    // since it last looked at the buffer.
    generation: u64,
    waiting: bool,
    waker: Option<Waker>,
}

impl ReaderState {
    fn wake(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

impl StreamReader {
    /// Creates an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ReaderState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `data` to the buffer and wakes the pending waiter, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::FeedAfterEof`] once [`feed_eof`](Self::feed_eof)
    /// has been called.
    pub fn feed(&self, data: &[u8]) -> Result<(), StreamError> {
        let mut state = self.state();
        if state.eof {
            return Err(StreamError::FeedAfterEof);
        }

        state.buffer.extend_from_slice(data);
        state.wake();
        Ok(())
    }

    /// Marks end of stream and wakes the pending waiter. Idempotent.
    pub fn feed_eof(&self) {
        let mut state = self.state();
        state.eof = true;
        state.wake();
    }

    /// Returns `true` once end of stream has been signaled.
    pub fn at_eof(&self) -> bool {
        self.state().eof
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.state().buffer.len()
    }

    /// Drains and returns the whole buffer without waiting.
    pub fn reset(&self) -> Bytes {
        self.state().buffer.split().freeze()
    }

    /// Reads from the stream.
    ///
    /// - `n == None`: returns everything currently buffered. If the buffer is
    ///   empty and the stream is still open, waits once for any data first.
    /// - `n == Some(len)`: waits until `len` bytes are buffered and returns
    ///   exactly those.
    ///
    /// # Errors
    ///
    /// - [`StreamError::PartialRead`] — end of stream arrived before `len` bytes
    ///   were available. The partial bytes are drained into the error.
    /// - [`StreamError::Timeout`] — `timeout` elapsed; the buffer is unchanged.
    pub async fn read(
        &self,
        n: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<Bytes, StreamError> {
        let Some(n) = n else {
            let seen = {
                let state = self.state();
                if !state.buffer.is_empty() || state.eof {
                    None
                } else {
                    Some(state.generation)
                }
            };
            if let Some(seen) = seen {
                self.wait_for_data(seen, timeout).await?;
            }
            return Ok(self.reset());
        };

        loop {
            let seen = {
                let mut state = self.state();
                if state.buffer.len() >= n {
                    return Ok(state.buffer.split_to(n).freeze());
                }
                if state.eof {
                    let partial = state.buffer.split().freeze();
                    return Err(StreamError::PartialRead {
                        partial,
                        expected: Some(n),
                    });
                }
                state.generation
            };

            self.wait_for_data(seen, timeout).await?;
        }
    }

    /// Waits for exactly `n` bytes. Shorthand for `read(Some(n), None)`.
    pub async fn read_exact(&self, n: usize) -> Result<Bytes, StreamError> {
        self.read(Some(n), None).await
    }

    /// Returns between 1 and `max` bytes, waiting once if the buffer is empty.
    ///
    /// Returns an empty buffer only at end of stream.
    pub async fn read_at_most(
        &self,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, StreamError> {
        loop {
            let seen = {
                let mut state = self.state();
                if !state.buffer.is_empty() || state.eof {
                    let take = max.min(state.buffer.len());
                    return Ok(state.buffer.split_to(take).freeze());
                }
                state.generation
            };

            self.wait_for_data(seen, timeout).await?;
        }
    }

    /// Reads up to `delimiter`, consuming the delimiter itself.
    ///
    /// The returned bytes include the delimiter only when `include` is set.
    ///
    /// # Errors
    ///
    /// - [`StreamError::PartialRead`] with `expected: None` when end of stream is
    ///   reached before the delimiter appears.
    /// - [`StreamError::Timeout`] — `timeout` elapsed; the buffer is unchanged.
    pub async fn read_until(
        &self,
        delimiter: &[u8],
        include: bool,
        timeout: Option<Duration>,
    ) -> Result<Bytes, StreamError> {
        self.read_until_limited(delimiter, include, usize::MAX, timeout).await
    }

    /// Like [`read_until`](Self::read_until), but gives up once `limit` bytes
    /// are buffered and the delimiter has not ended within them.
    ///
    /// # Errors
    ///
    /// Everything [`read_until`](Self::read_until) returns, plus
    /// [`StreamError::LimitOverrun`]. The buffer is left untouched.
    pub async fn read_until_limited(
        &self,
        delimiter: &[u8],
        include: bool,
        limit: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, StreamError> {
        let mut searched = 0;

        loop {
            let seen = {
                let mut state = self.state();
                let found = find(&state.buffer, delimiter, searched);
                if found.map_or(state.buffer.len(), |pos| pos + delimiter.len()) > limit {
                    return Err(StreamError::LimitOverrun { limit });
                }
                if let Some(pos) = found {
                    let mut data = state.buffer.split_to(pos + delimiter.len());
                    if !include {
                        data.truncate(pos);
                    }
                    return Ok(data.freeze());
                }
                if state.eof {
                    let partial = state.buffer.split().freeze();
                    return Err(StreamError::PartialRead {
                        partial,
                        expected: None,
                    });
                }

                // The delimiter may straddle the boundary of the next feed.
                searched = state.buffer.len().saturating_sub(delimiter.len().saturating_sub(1));
                state.generation
            };

            self.wait_for_data(seen, timeout).await?;
        }
    }

    /// Reads one `\n`-terminated line.
    ///
    /// Line reads tolerate truncation: if end of stream arrives first, the
    /// partial line is returned instead of an error.
    pub async fn read_line(
        &self,
        include: bool,
        timeout: Option<Duration>,
    ) -> Result<Bytes, StreamError> {
        match self.read_until(b"\n", include, timeout).await {
            Err(StreamError::PartialRead { partial, .. }) => Ok(partial),
            other => other,
        }
    }

    async fn wait_for_data(&self, seen: u64, timeout: Option<Duration>) -> Result<(), StreamError> {
        let waiter = DataWaiter::register(self, seen);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, waiter)
                .await
                .map_err(|_| StreamError::Timeout),
            None => {
                waiter.await;
                Ok(())
            }
        }
    }
}

// Single-slot continuation: resolves as soon as the reader's generation moves
// past `seen` or end of stream is signaled.
struct DataWaiter<'a> {
    reader: &'a StreamReader,
    seen: u64,
}

impl<'a> DataWaiter<'a> {
    fn register(reader: &'a StreamReader, seen: u64) -> Self {
        let mut state = reader.state();
        if state.waiting {
            panic!("already waiting for data on this stream");
        }
        state.waiting = true;
        drop(state);

        Self { reader, seen }
    }
}

impl Future for DataWaiter<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.reader.state();
        if state.eof || state.generation != self.seen {
            return Poll::Ready(());
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for DataWaiter<'_> {
    fn drop(&mut self) {
        let mut state = self.reader.state();
        state.waiting = false;
        state.waker = None;
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

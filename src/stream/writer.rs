//! Write side of a buffered stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::StreamError;

/// Outcome published by the write pump once the transport is torn down.
pub(crate) type CloseOutcome = Result<(), Arc<std::io::Error>>;

/// Instructions queued for the write pump.
#[derive(Debug)]
pub(crate) enum WriteCommand {
    Data(Bytes),
    /// Half-close: shut down the write direction, keep reading.
    Shutdown,
    Close,
}

/// Flow-control state shared between writers and the write pump.
#[derive(Debug)]
pub(crate) struct FlowControl {
    pending: AtomicUsize,
    high_water: usize,
    low_water: usize,
    closing: AtomicBool,
    // `true` while backpressure is armed. Drainers wait for it to flip back.
    paused: watch::Sender<bool>,
}

impl FlowControl {
    pub(crate) fn new(high_water: usize, low_water: usize) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            pending: AtomicUsize::new(0),
            high_water,
            low_water,
            closing: AtomicBool::new(false),
            paused,
        }
    }

    fn queued(&self, len: usize) {
        let pending = self.pending.fetch_add(len, Ordering::AcqRel) + len;
        if pending > self.high_water {
            self.pause();
        }
    }

    /// Called by the pump after `len` bytes reached the transport.
    pub(crate) fn consumed(&self, len: usize) {
        let pending = self.pending.fetch_sub(len, Ordering::AcqRel).saturating_sub(len);
        if pending <= self.low_water {
            self.resume();
        }
    }

    pub(crate) fn pause(&self) {
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true));
    }

    pub(crate) fn resume(&self) {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false));
    }

    pub(crate) fn mark_closing(&self) {
        self.closing.store(true, Ordering::Release);
        self.resume();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// Non-blocking writer over a transport.
///
/// [`write`](Self::write) only queues bytes; the transport's write pump moves
/// them to the socket. When more than the high-water mark is queued the writer
/// arms backpressure, and [`drain`](Self::drain) waits until the pump has
/// brought the backlog down to the low-water mark.
///
/// Clones share the same transport.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    commands: mpsc::UnboundedSender<WriteCommand>,
    flow: Arc<FlowControl>,
    closed: watch::Receiver<Option<CloseOutcome>>,
}

impl StreamWriter {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<WriteCommand>,
        flow: Arc<FlowControl>,
        closed: watch::Receiver<Option<CloseOutcome>>,
    ) -> Self {
        Self {
            commands,
            flow,
            closed,
        }
    }

    /// Schedules `data` for the transport. Never waits.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the writer is closing.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        if self.flow.is_closing() {
            return Err(StreamError::Closed);
        }

        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }

        // Count the bytes before the pump can see them, or its `consumed` may
        // run first and underflow the counter.
        let len = data.len();
        self.flow.queued(len);
        self.commands.send(WriteCommand::Data(data)).map_err(|_| {
            self.flow.consumed(len);
            StreamError::Closed
        })
    }

    /// Schedules `data` and then waits for backpressure to be released.
    pub async fn write_and_drain(
        &self,
        data: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<(), StreamError> {
        self.write(data)?;
        self.drain(timeout).await
    }

    /// Schedules every buffer in `lines`, in order.
    pub fn writelines<I>(&self, lines: I) -> Result<(), StreamError>
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        for line in lines {
            self.write(line)?;
        }
        Ok(())
    }

    /// Shuts down the write direction after queued data is flushed. The read
    /// direction stays open.
    pub fn write_eof(&self) -> Result<(), StreamError> {
        if self.flow.is_closing() {
            return Err(StreamError::Closed);
        }
        self.commands
            .send(WriteCommand::Shutdown)
            .map_err(|_| StreamError::Closed)
    }

    /// Arms backpressure. Normally driven by the write pump.
    pub fn pause(&self) {
        self.flow.pause();
    }

    /// Releases backpressure and wakes every drainer.
    pub fn resume(&self) {
        self.flow.resume();
    }

    /// Waits until backpressure is released.
    ///
    /// Returns immediately when nothing is armed. Once the transport is
    /// closing this yields once and returns, since nothing will ever resume it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Timeout`] if `timeout` elapses first.
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<(), StreamError> {
        if self.flow.is_closing() {
            tokio::task::yield_now().await;
            return Ok(());
        }

        let mut paused = self.flow.paused.subscribe();
        let released = async move {
            // The sender lives as long as `self.flow`, so this cannot fail
            // while we hold `self`.
            let _ = paused.wait_for(|paused| !*paused).await;
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, released)
                .await
                .map_err(|_| StreamError::Timeout),
            None => {
                released.await;
                Ok(())
            }
        }
    }

    /// Returns `true` once [`close`](Self::close) was called or the transport
    /// failed.
    pub fn is_closing(&self) -> bool {
        self.flow.is_closing()
    }

    /// Flushes queued data and closes the transport. Idempotent.
    pub fn close(&self) {
        if !self.flow.is_closing() {
            let _ = self.commands.send(WriteCommand::Close);
        }
        self.flow.mark_closing();
    }

    /// Waits until transport teardown has completed.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] when the transport was torn down because of
    /// an I/O error.
    pub async fn wait_closed(&self) -> Result<(), StreamError> {
        let mut closed = self.closed.clone();
        let outcome = match closed.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // Pump is gone without publishing; nothing left to wait for.
            Err(_) => None,
        };

        match outcome {
            Some(Err(err)) => Err(StreamError::Io(err)),
            _ => Ok(()),
        }
    }
}

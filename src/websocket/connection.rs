//! The per-connection WebSocket state machine.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::WebSocketError;
use super::frame::{CloseCode, DEFAULT_MAX_PAYLOAD, Frame, Opcode};
use crate::stream::{StreamError, StreamReader, StreamWriter};

mod sealed {
    pub trait Sealed {}
}

/// Which end of the connection this endpoint is. Decides masking.
pub trait Role: sealed::Sealed + Send + Sync + 'static {
    /// Outgoing frames are masked.
    const MASKS_OUTGOING: bool;
    const NAME: &'static str;
}

/// Server endpoint: sends unmasked frames, expects masked ones.
#[derive(Debug)]
pub enum Server {}

/// Client endpoint: sends masked frames, expects unmasked ones.
#[derive(Debug)]
pub enum Client {}

impl sealed::Sealed for Server {}
impl sealed::Sealed for Client {}

impl Role for Server {
    const MASKS_OUTGOING: bool = false;
    const NAME: &'static str = "server";
}

impl Role for Client {
    const MASKS_OUTGOING: bool = true;
    const NAME: &'static str = "client";
}

pub type ServerWebSocket = WebSocket<Server>;
pub type ClientWebSocket = WebSocket<Client>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Open,
    /// A frame is being encoded and written.
    Sending,
    /// A frame is being decoded.
    Receiving,
    /// A CLOSE frame was received or sent; the transport is still up.
    Closing,
    Closed,
}

/// A received frame as surfaced to application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: Opcode,
    fin: bool,
    payload: Bytes,
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// `false` when more continuation frames follow.
    pub fn is_final(&self) -> bool {
        self.fin
    }

    pub fn is_text(&self) -> bool {
        self.opcode == Opcode::Text
    }

    pub fn is_binary(&self) -> bool {
        self.opcode == Opcode::Binary
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The payload as UTF-8.
    pub fn text(&self) -> Result<&str, WebSocketError> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, WebSocketError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(CloseCode(u16::from_be_bytes([self.payload[0], self.payload[1]])))
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Self {
            opcode: frame.opcode,
            fin: frame.fin,
            payload: frame.payload,
        }
    }
}

/// One end of an upgraded WebSocket connection.
///
/// The role parameter fixes masking at compile time: a [`ServerWebSocket`]
/// never masks what it sends and rejects unmasked frames, a
/// [`ClientWebSocket`] does the inverse.
///
/// ```rust,no_run
/// use switchyard::websocket::ServerWebSocket;
///
/// async fn echo(mut socket: ServerWebSocket) -> Result<(), switchyard::websocket::WebSocketError> {
///     while let Some(message) = socket.next().await {
///         let message = message?;
///         socket.send_frame(switchyard::websocket::Frame::new(
///             message.opcode(),
///             message.into_payload(),
///             true,
///         )).await?;
///     }
///     socket.close(switchyard::websocket::CloseCode::NORMAL, "").await
/// }
/// ```
#[derive(Debug)]
pub struct WebSocket<R: Role> {
    reader: StreamReader,
    writer: StreamWriter,
    state: State,
    received_close: bool,
    sent_close: bool,
    max_payload: usize,
    subprotocol: Option<String>,
    _role: PhantomData<R>,
}

impl<R: Role> WebSocket<R> {
    /// Wraps a stream pair on which the handshake has already completed.
    pub fn new(reader: StreamReader, writer: StreamWriter) -> Self {
        Self {
            reader,
            writer,
            state: State::Open,
            received_close: false,
            sent_close: false,
            max_payload: DEFAULT_MAX_PAYLOAD,
            subprotocol: None,
            _role: PhantomData,
        }
    }

    /// Caps the payload size accepted from the peer.
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub(crate) fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    /// Subprotocol agreed during the handshake.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// `true` once either side started the close handshake.
    pub fn should_close(&self) -> bool {
        self.received_close || self.sent_close || self.state == State::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Encodes and writes one frame, then waits for the writer to drain.
    ///
    /// Sending after the close handshake started is allowed but logged, since
    /// the peer may ignore it.
    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), WebSocketError> {
        if self.state == State::Closed {
            return Err(WebSocketError::Closed);
        }
        if self.should_close() && frame.opcode != Opcode::Close {
            tracing::warn!(
                role = R::NAME,
                opcode = ?frame.opcode,
                "sending a frame after the close handshake started"
            );
        }

        let encoded = frame.encode(R::MASKS_OUTGOING)?;
        let previous = self.enter(State::Sending);
        let result = self.writer.write_and_drain(encoded.freeze(), None).await;
        self.leave(previous);

        if frame.opcode == Opcode::Close {
            self.sent_close = true;
            if result.is_ok() && self.state != State::Closed {
                self.state = State::Closing;
            }
        }
        result.map_err(|err| self.transport_failed(err))
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.send_frame(Frame::text(text.into())).await
    }

    pub async fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send_frame(Frame::binary(data)).await
    }

    /// Serializes `value` and sends it as a text frame.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), WebSocketError> {
        let text = serde_json::to_string(value)?;
        self.send_frame(Frame::text(text)).await
    }

    pub async fn ping(&mut self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send_frame(Frame::ping(data)).await
    }

    pub async fn pong(&mut self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send_frame(Frame::pong(data)).await
    }

    pub async fn continuation(&mut self, data: impl Into<Bytes>, fin: bool) -> Result<(), WebSocketError> {
        self.send_frame(Frame::continuation(data, fin)).await
    }

    /// Reads the next frame of any kind.
    ///
    /// A CLOSE frame moves the connection to [`State::Closing`]. Protocol
    /// violations fail the connection with status 1002 and are returned.
    pub async fn receive(&mut self) -> Result<Frame, WebSocketError> {
        if self.state == State::Closed {
            return Err(WebSocketError::Closed);
        }
        if self.state == State::Closing {
            tracing::warn!(
                role = R::NAME,
                "receiving after the close handshake started; the peer may never send again"
            );
        }

        let previous = self.enter(State::Receiving);
        let reader = self.reader.clone();
        let decoded = Frame::decode(
            move |n| {
                let reader = reader.clone();
                async move { reader.read_exact(n).await }
            },
            self.max_payload,
        )
        .await;
        self.leave(previous);

        let frame = match decoded {
            Ok(frame) => frame,
            Err(err) => return Err(self.receive_failed(err).await),
        };

        // Clients must mask; servers must not.
        if frame.masked == R::MASKS_OUTGOING {
            let err = WebSocketError::MaskMismatch { masked: frame.masked };
            return Err(self.receive_failed(err).await);
        }

        if frame.opcode == Opcode::Close {
            tracing::debug!(role = R::NAME, code = ?frame.close_code(), "close frame received");
            self.received_close = true;
            self.state = State::Closing;
        }
        Ok(frame)
    }

    /// Next application message, or `None` once a CLOSE frame arrives or the
    /// connection is closed.
    ///
    /// PINGs are answered with PONGs and PONGs are skipped.
    pub async fn next(&mut self) -> Option<Result<Message, WebSocketError>> {
        loop {
            if self.state == State::Closed || self.received_close {
                return None;
            }

            let frame = match self.receive().await {
                Ok(frame) => frame,
                Err(WebSocketError::Stream(err)) if err.is_clean_eof() => return None,
                Err(err) => return Some(Err(err)),
            };

            match frame.opcode {
                Opcode::Close => return None,
                Opcode::Ping => {
                    if let Err(err) = self.pong(frame.payload).await {
                        return Some(Err(err));
                    }
                }
                Opcode::Pong => {}
                _ => return Some(Ok(frame.into())),
            }
        }
    }

    /// Sends a CLOSE frame (unless one was already sent) and shuts the
    /// transport down. Idempotent.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), WebSocketError> {
        if self.state == State::Closed {
            return Ok(());
        }

        let result = if self.sent_close {
            Ok(())
        } else {
            self.state = State::Closing;
            self.send_frame(Frame::close(code, reason)).await
        };

        self.writer.close();
        self.state = State::Closed;
        tracing::debug!(role = R::NAME, %code, "websocket closed");
        result
    }

    /// Waits until the underlying transport is fully torn down.
    pub async fn wait_closed(&self) -> Result<(), WebSocketError> {
        Ok(self.writer.wait_closed().await?)
    }

    fn enter(&mut self, busy: State) -> State {
        let previous = self.state;
        if previous == State::Open {
            self.state = busy;
        }
        previous
    }

    fn leave(&mut self, previous: State) {
        if matches!(self.state, State::Sending | State::Receiving) {
            self.state = previous;
        }
    }

    async fn receive_failed(&mut self, err: WebSocketError) -> WebSocketError {
        if err.is_protocol_error() {
            tracing::warn!(role = R::NAME, error = %err, "protocol violation; failing connection");
            if !self.sent_close {
                // The peer broke the protocol; a lost close frame changes nothing.
                let _ = self
                    .send_frame(Frame::close(CloseCode::PROTOCOL_ERROR, ""))
                    .await;
            }
            self.writer.close();
            self.state = State::Closed;
        } else if let WebSocketError::Stream(StreamError::PartialRead { .. }) = &err {
            self.writer.close();
            self.state = State::Closed;
        }
        err
    }

    fn transport_failed(&mut self, err: StreamError) -> WebSocketError {
        if matches!(err, StreamError::Closed | StreamError::Io(_)) {
            self.state = State::Closed;
        }
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{TransportOptions, open};

    fn pair() -> (ServerWebSocket, ClientWebSocket) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (sr, sw) = open(a, TransportOptions::default());
        let (cr, cw) = open(b, TransportOptions::default());
        (WebSocket::new(sr, sw), WebSocket::new(cr, cw))
    }

    #[tokio::test]
    async fn text_roundtrip_between_roles() {
        let (mut server, mut client) = pair();

        client.send_text("hello").await.unwrap();
        let frame = server.receive().await.unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(frame.masked);
        assert_eq!(&frame.payload[..], b"hello");

        server.send_binary(vec![1u8, 2, 3]).await.unwrap();
        let frame = client.receive().await.unwrap();
        assert!(!frame.masked);
        assert_eq!(&frame.payload[..], &[1, 2, 3]);
        assert_eq!(server.state(), State::Open);
    }

    #[tokio::test]
    async fn json_messages() {
        let (mut server, mut client) = pair();
        client.send_json(&serde_json::json!({"n": 1})).await.unwrap();

        let message = server.next().await.unwrap().unwrap();
        assert!(message.is_text());
        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value["n"], 1);
    }

    #[tokio::test]
    async fn iteration_answers_pings_and_skips_pongs() {
        let (mut server, mut client) = pair();

        client.ping("are you there").await.unwrap();
        client.pong("stray").await.unwrap();
        client.send_text("data").await.unwrap();

        let message = server.next().await.unwrap().unwrap();
        assert_eq!(message.text().unwrap(), "data");

        let pong = client.receive().await.unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(&pong.payload[..], b"are you there");
    }

    #[tokio::test]
    async fn close_handshake() {
        let (mut server, mut client) = pair();

        client.send_text("last").await.unwrap();
        client.send_frame(Frame::close(CloseCode::NORMAL, "done")).await.unwrap();
        assert!(client.should_close());
        assert_eq!(client.state(), State::Closing);

        assert_eq!(server.next().await.unwrap().unwrap().text().unwrap(), "last");
        assert!(server.next().await.is_none());
        assert_eq!(server.state(), State::Closing);
        assert!(server.should_close());
        // Iteration stays finished.
        assert!(server.next().await.is_none());

        // Still permitted while closing.
        server.send_text("late").await.unwrap();

        server.close(CloseCode::NORMAL, "").await.unwrap();
        assert!(server.is_closed());
        assert!(matches!(server.receive().await, Err(WebSocketError::Closed)));
        assert!(matches!(server.send_text("x").await, Err(WebSocketError::Closed)));
        server.wait_closed().await.unwrap();

        let late = client.receive().await.unwrap();
        assert_eq!(&late.payload[..], b"late");
        let reply = client.receive().await.unwrap();
        assert_eq!(reply.close_code(), Some(CloseCode::NORMAL));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut server, _client) = pair();
        server.close(CloseCode::GOING_AWAY, "bye").await.unwrap();
        server.close(CloseCode::GOING_AWAY, "bye").await.unwrap();
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn unmasked_frame_fails_server() {
        let (a, b) = tokio::io::duplex(1024);
        let (sr, sw) = open(a, TransportOptions::default());
        let (cr, cw) = open(b, TransportOptions::default());
        let mut server = ServerWebSocket::new(sr, sw);

        // Unmasked text frame, as a misbehaving client would send.
        cw.write(Frame::text("hi").encode(false).unwrap().freeze()).unwrap();

        let err = server.receive().await.unwrap_err();
        assert!(matches!(err, WebSocketError::MaskMismatch { masked: false }));
        assert!(server.is_closed());

        let mut client = ClientWebSocket::new(cr, cw);
        let close = client.receive().await.unwrap();
        assert_eq!(close.close_code(), Some(CloseCode::PROTOCOL_ERROR));
    }

    #[tokio::test]
    async fn peer_disconnect_ends_iteration() {
        let (mut server, client) = pair();
        drop(client);
        assert!(server.next().await.is_none());
    }
}

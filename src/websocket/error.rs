//! Error type for the WebSocket codec and connection.

use thiserror::Error;

use crate::stream::StreamError;

/// WebSocket protocol and connection errors.
///
/// Everything [`is_protocol_error`](Self::is_protocol_error) reports as a
/// protocol error is fatal to the connection: it is closed with status 1002.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),

    #[error("control frames must not be fragmented")]
    FragmentedControlFrame,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(usize),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    #[error("malformed close frame payload")]
    InvalidClosePayload,

    #[error("frame masking does not match the peer's role (masked: {masked})")]
    MaskMismatch { masked: bool },

    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u64, max: usize },

    #[error("websocket is closed")]
    Closed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("text payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl WebSocketError {
    /// `true` for violations of RFC 6455 framing rules by the peer.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            WebSocketError::InvalidOpcode(_)
                | WebSocketError::InvalidCloseCode(_)
                | WebSocketError::FragmentedControlFrame
                | WebSocketError::ControlFrameTooLarge(_)
                | WebSocketError::ReservedBitsSet
                | WebSocketError::InvalidClosePayload
                | WebSocketError::MaskMismatch { .. }
                | WebSocketError::PayloadTooLarge { .. }
        )
    }
}

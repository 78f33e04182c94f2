//! RFC 6455 frame layout: encoding to bytes and decoding from a stream.

use std::future::Future;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::WebSocketError;
use super::mask::{apply_mask, generate_mask};
use crate::stream::StreamError;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Default cap on a single decoded payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// CLOSE, PING and PONG.
    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }

    #[inline]
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = WebSocketError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(WebSocketError::InvalidOpcode(other)),
        }
    }
}

/// Status code carried by a CLOSE frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNSUPPORTED_DATA: CloseCode = CloseCode(1003);
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    pub const INVALID_PAYLOAD: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    pub const MANDATORY_EXTENSION: CloseCode = CloseCode(1010);
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);
    pub const SERVICE_RESTART: CloseCode = CloseCode(1012);
    pub const TRY_AGAIN_LATER: CloseCode = CloseCode(1013);
    pub const BAD_GATEWAY: CloseCode = CloseCode(1014);
    pub const TLS_HANDSHAKE: CloseCode = CloseCode(1015);

    /// The standard range plus the registered/private range.
    pub fn is_valid(self) -> bool {
        matches!(self.0, 1000..=1015 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        code.0
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One WebSocket frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    /// Whether the frame carried a masking key on the wire. Ignored by
    /// [`encode`](Self::encode), which takes the decision as an argument.
    pub masked: bool,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, data, true)
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, data, true)
    }

    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, data, true)
    }

    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, data, true)
    }

    pub fn continuation(data: impl Into<Bytes>, fin: bool) -> Self {
        Self::new(Opcode::Continuation, data, fin)
    }

    /// A CLOSE frame with a status code and UTF-8 reason.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code.0);
        payload.put_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload.freeze(), true)
    }

    /// Status code of a CLOSE frame, if it carries one.
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(CloseCode(u16::from_be_bytes([self.payload[0], self.payload[1]])))
    }

    /// Reason text of a CLOSE frame (lossy), empty when absent.
    pub fn close_reason(&self) -> String {
        if self.opcode != Opcode::Close || self.payload.len() <= 2 {
            return String::new();
        }
        String::from_utf8_lossy(&self.payload[2..]).into_owned()
    }

    /// Checks the frame against the framing rules shared by both directions.
    pub fn validate(&self) -> Result<(), WebSocketError> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(WebSocketError::ReservedBitsSet);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(WebSocketError::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(WebSocketError::ControlFrameTooLarge(self.payload.len()));
            }
        }
        if self.opcode == Opcode::Close {
            match self.payload.len() {
                0 => {}
                1 => return Err(WebSocketError::InvalidClosePayload),
                _ => {
                    let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                    if !CloseCode(code).is_valid() {
                        return Err(WebSocketError::InvalidCloseCode(code));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serializes the frame, masking the payload with a fresh key when `masked`.
    pub fn encode(&self, masked: bool) -> Result<BytesMut, WebSocketError> {
        self.validate()?;

        let len = self.payload.len();
        let mut buf = BytesMut::with_capacity(len + 14);

        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        buf.put_u8(b0);

        let mask_bit = if masked { 0x80 } else { 0x00 };
        if len < 126 {
            buf.put_u8(mask_bit | len as u8);
        } else if len < 65536 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(len as u64);
        }

        if masked {
            let mask = generate_mask();
            buf.put_slice(&mask);
            let start = buf.len();
            buf.put_slice(&self.payload);
            apply_mask(&mut buf[start..], mask);
        } else {
            buf.put_slice(&self.payload);
        }

        Ok(buf)
    }

    /// Reads one frame using `read_exact`, which must resolve to exactly the
    /// requested number of bytes.
    ///
    /// The masking key is read only when the mask bit is set; whether the
    /// peer was supposed to mask is the connection's concern. Payloads larger
    /// than `max_payload` are rejected before any of it is read.
    pub async fn decode<F, Fut>(mut read_exact: F, max_payload: usize) -> Result<Frame, WebSocketError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<Bytes, StreamError>>,
    {
        let head = read_exact(2).await?;
        let (b0, b1) = (head[0], head[1]);

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        let rsv2 = b0 & 0x20 != 0;
        let rsv3 = b0 & 0x10 != 0;
        let opcode = Opcode::try_from(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;

        let len = match b1 & 0x7F {
            126 => read_exact(2).await?.get_u16() as u64,
            127 => read_exact(8).await?.get_u64(),
            n => n as u64,
        };
        if len > max_payload as u64 {
            return Err(WebSocketError::PayloadTooLarge { len, max: max_payload });
        }
        // Checked before the payload is read so an oversized ping cannot
        // make us buffer it.
        if opcode.is_control() && len > MAX_CONTROL_PAYLOAD as u64 {
            if !fin {
                return Err(WebSocketError::FragmentedControlFrame);
            }
            return Err(WebSocketError::ControlFrameTooLarge(len as usize));
        }

        let mask = if masked {
            let key = read_exact(4).await?;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        let payload = if len == 0 {
            Bytes::new()
        } else {
            let data = read_exact(len as usize).await?;
            match mask {
                Some(mask) => {
                    let mut data = BytesMut::from(&data[..]);
                    apply_mask(&mut data, mask);
                    data.freeze()
                }
                None => data,
            }
        };

        let frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            masked,
            payload,
        };
        frame.validate()?;
        Ok(frame)
    }
}

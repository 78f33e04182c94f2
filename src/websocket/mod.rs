//! RFC 6455 WebSockets on top of the buffered stream pair.
//!
//! - [`frame`]: the frame codec ([`Frame::encode`] / [`Frame::decode`]).
//! - [`handshake`]: upgrade detection, the `101` reply, and the client side.
//! - [`connection`]: the [`WebSocket`] state machine, parameterized by role.
//!
//! The server hands a [`ServerWebSocket`] to the route's handler after a
//! successful upgrade; [`connect`] produces a [`ClientWebSocket`].

pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;

pub use connection::{Client, ClientWebSocket, Message, Role, Server, ServerWebSocket, State, WebSocket};
pub use error::WebSocketError;
pub use frame::{CloseCode, Frame, Opcode};
pub use handshake::{accept_key, connect, is_upgrade_request};

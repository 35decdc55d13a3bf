//! WebSocket layer, RFC 6455: frame codec, the `13` upgrade handshake and
//! session/client/server endpoints on top of the HTTP transport.

pub mod client;
mod engine;
pub mod frame;
pub mod handshake;
pub mod server;
pub mod session;

/// Frame header flag bits, combined as `WS_FIN | WS_TEXT` and friends.
pub const WS_FIN: u8 = 0x80;
pub const WS_CONTINUATION: u8 = 0x00;
pub const WS_TEXT: u8 = 0x01;
pub const WS_BINARY: u8 = 0x02;
pub const WS_CLOSE: u8 = 0x08;
pub const WS_PING: u8 = 0x09;
pub const WS_PONG: u8 = 0x0A;

/// Close status codes, RFC 6455 §7.4.1.
pub const CLOSE_STATUS_NORMAL: u16 = 1000;
pub const CLOSE_STATUS_PROTOCOL_ERROR: u16 = 1002;

pub use self::client::{WsClient, WsClientHandler};
pub use self::frame::{FrameDecoder, OpCode, WsFrame};
pub use self::handshake::{accept_key, generate_key, WS_GUID};
pub use self::server::{WsServer, WsServerHandler};
pub use self::session::{WsSession, WsSessionHandler};

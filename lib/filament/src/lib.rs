//! `Filament` is a network endpoint toolkit: an I/O reactor plus client and
//! server endpoints for raw TCP, HTTP/1.1 and WebSocket transports.
//! Applications supply handlers and wire protocols, the toolkit owns
//! concurrency, buffering, connection lifecycle and framing.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod buffer;
pub mod config;
pub mod http;
pub mod reactor;
pub mod support;
pub mod tcp;
pub mod ws;

pub use crate::config::{Protocol, Settings, SocketOptions};
pub use crate::reactor::{Reactor, ReactorHandler};
pub use crate::support::{Error, ErrorUtils, NetResult};
pub use ember::ConnectionId;

//! Connection oriented TCP endpoints: an outbound client and a
//! multi-session server sharing the same double buffered send pipeline and
//! single outstanding read/write discipline.

pub mod client;
pub mod server;
pub mod session;

use socket2::{Domain, Socket, Type};
use std::io;
use std::net::SocketAddr;

use crate::config::SocketOptions;

pub use self::client::{TcpClient, TcpClientHandler};
pub use self::server::{TcpServer, TcpServerHandler};
pub use self::session::{TcpSession, TcpSessionHandler};

pub const DEFAULT_RECV_CAPACITY: usize = 8192;
pub const DEFAULT_SEND_CAPACITY: usize = 8192;
const LISTEN_BACKLOG: i32 = 1024;

/// Current connectivity of an endpoint.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Builds a non-blocking listener with the advisory options applied before
/// bind, where they have to happen.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    options: &SocketOptions,
) -> io::Result<mio::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, None)?;

    if options.reuse_address {
        socket.set_reuse_address(true)?;
    }

    #[cfg(unix)]
    {
        if options.reuse_port {
            socket.set_reuse_port(true)?;
        }
    }

    apply_common_options(&socket, options);

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(mio::net::TcpListener::from_std(socket.into()))
}

/// Applies the connection-level options to an established stream. All of
/// them are advisory, failures are swallowed.
pub(crate) fn apply_stream_options(stream: &mio::net::TcpStream, options: &SocketOptions) {
    if options.no_delay {
        drop(stream.set_nodelay(true));
    }

    apply_common_options(&socket2::SockRef::from(stream), options);
}

fn apply_common_options(socket: &Socket, options: &SocketOptions) {
    if options.keep_alive {
        drop(socket.set_keepalive(true));
    }

    if let Some(size) = options.receive_buffer_size {
        drop(socket.set_recv_buffer_size(size));
    }

    if let Some(size) = options.send_buffer_size {
        drop(socket.set_send_buffer_size(size));
    }
}

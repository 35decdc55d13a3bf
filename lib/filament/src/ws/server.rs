use ember::logging;
use ember::ConnectionId;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::http::server::{HttpServer, HttpServerHandler};
use crate::http::session::HttpSessionHandler;
use crate::reactor::Reactor;
use crate::support::Error;
use crate::ws::frame::prepare_frame;
use crate::ws::session::{WsSession, WsSessionHandler};
use crate::ws::{WS_BINARY, WS_CLOSE, WS_FIN, WS_PING, WS_PONG, WS_TEXT};

/// Callbacks and session factory of a WebSocket server.
pub trait WsServerHandler: Send + Sync + 'static {
    /// Supplies the application handler of a freshly accepted session.
    fn create_session(&self) -> Arc<dyn WsSessionHandler>;

    fn on_started(&self) {}
    fn on_stopped(&self) {}
    fn on_error(&self, _error: &Error) {}
}

/// Bridges the HTTP server callbacks into WebSocket sessions.
struct Adapter {
    handler: Arc<dyn WsServerHandler>,
    log: logging::Logger,
}

impl HttpServerHandler for Adapter {
    fn create_session(&self) -> Arc<dyn HttpSessionHandler> {
        WsSession::create(self.handler.create_session(), &self.log)
    }

    fn on_started(&self) {
        self.handler.on_started();
    }

    fn on_stopped(&self) {
        self.handler.on_stopped();
    }

    fn on_error(&self, error: &Error) {
        self.handler.on_error(error);
    }
}

/// WebSocket server: an HTTP server whose sessions answer the `13`
/// upgrade and then speak frames. Multicast prepares one unmasked frame
/// and fans the bytes out over the TCP pipeline.
#[derive(Clone)]
pub struct WsServer {
    http: HttpServer,
}

impl WsServer {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reactor: &Reactor,
        settings: Settings,
        handler: Arc<dyn WsServerHandler>,
        log: L,
    ) -> WsServer {
        let log = logging::child(log, logging::o!("unit" => "ws_server"));

        let adapter = Arc::new(Adapter {
            handler,
            log: log.clone(),
        });

        WsServer {
            http: HttpServer::new(reactor, settings, adapter, &log),
        }
    }

    /// The underlying HTTP server.
    #[inline]
    pub fn http(&self) -> &HttpServer {
        &self.http
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.http.id()
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.http.is_started()
    }

    #[inline]
    pub fn address(&self) -> Option<SocketAddr> {
        self.http.address()
    }

    pub fn start(&self) -> bool {
        self.http.start()
    }

    pub fn stop(&self) -> bool {
        self.http.stop()
    }

    pub fn session_count(&self) -> usize {
        self.http.session_count()
    }

    pub fn disconnect_all(&self) -> bool {
        self.http.disconnect_all()
    }

    pub fn multicast_text(&self, data: &[u8]) -> bool {
        self.multicast_frame(WS_FIN | WS_TEXT, data)
    }

    pub fn multicast_binary(&self, data: &[u8]) -> bool {
        self.multicast_frame(WS_FIN | WS_BINARY, data)
    }

    pub fn multicast_ping(&self, data: &[u8]) -> bool {
        self.multicast_frame(WS_FIN | WS_PING, data)
    }

    pub fn multicast_pong(&self, data: &[u8]) -> bool {
        self.multicast_frame(WS_FIN | WS_PONG, data)
    }

    /// Sends a CLOSE with the given status to every session and
    /// disconnects them all.
    pub fn close_all(&self, status: u16) -> bool {
        let frame = prepare_frame(WS_FIN | WS_CLOSE, false, &[], Some(status));

        if !self.http.multicast(&frame) {
            return false;
        }

        self.http.disconnect_all()
    }

    fn multicast_frame(&self, header: u8, data: &[u8]) -> bool {
        let frame = prepare_frame(header, false, data, None);
        self.http.multicast(&frame)
    }
}

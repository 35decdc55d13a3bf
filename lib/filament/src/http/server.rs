use ember::logging;
use ember::ConnectionId;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::http::cache::ContentCache;
use crate::http::session::{HttpSession, HttpSessionHandler};
use crate::reactor::Reactor;
use crate::support::Error;
use crate::tcp::server::{TcpServer, TcpServerHandler};
use crate::tcp::session::{TcpSession, TcpSessionHandler};

/// Callbacks and session factory of an HTTP server.
pub trait HttpServerHandler: Send + Sync + 'static {
    /// Supplies the application handler of a freshly accepted session.
    fn create_session(&self) -> Arc<dyn HttpSessionHandler>;

    fn on_started(&self) {}
    fn on_stopped(&self) {}
    fn on_error(&self, _error: &Error) {}
}

/// Bridges the TCP server callbacks into HTTP sessions.
struct Adapter {
    cache: Arc<ContentCache>,
    handler: Arc<dyn HttpServerHandler>,
    log: logging::Logger,
}

impl TcpServerHandler for Adapter {
    fn create_session(&self) -> Arc<dyn TcpSessionHandler> {
        HttpSession::create(self.cache.clone(), self.handler.create_session(), &self.log)
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

/// HTTP server: a TCP server whose sessions parse requests and serve the
/// shared content cache.
#[derive(Clone)]
pub struct HttpServer {
    tcp: TcpServer,
    cache: Arc<ContentCache>,
}

impl HttpServer {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reactor: &Reactor,
        settings: Settings,
        handler: Arc<dyn HttpServerHandler>,
        log: L,
    ) -> HttpServer {
        let log = logging::child(log, logging::o!("unit" => "http_server"));
        let cache = Arc::new(ContentCache::new());

        let adapter = Arc::new(Adapter {
            cache: cache.clone(),
            handler,
            log: log.clone(),
        });

        HttpServer {
            tcp: TcpServer::new(reactor, settings, adapter, &log),
            cache,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.tcp.id()
    }

    /// The underlying TCP server.
    #[inline]
    pub fn tcp(&self) -> &TcpServer {
        &self.tcp
    }

    /// The content cache answered on GET requests.
    #[inline]
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.tcp.is_started()
    }

    #[inline]
    pub fn address(&self) -> Option<SocketAddr> {
        self.tcp.address()
    }

    pub fn start(&self) -> bool {
        self.tcp.start()
    }

    pub fn stop(&self) -> bool {
        if !self.tcp.stop() {
            return false;
        }

        self.cache.clear();
        true
    }

    /// Sends the same raw payload to every session.
    pub fn multicast(&self, buffer: &[u8]) -> bool {
        self.tcp.multicast(buffer)
    }

    pub fn disconnect_all(&self) -> bool {
        self.tcp.disconnect_all()
    }

    pub fn session_count(&self) -> usize {
        self.tcp.session_count()
    }

    pub fn find_session(&self, id: ConnectionId) -> Option<Arc<TcpSession>> {
        self.tcp.find_session(id)
    }
}

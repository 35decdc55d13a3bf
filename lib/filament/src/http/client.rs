use ember::logging;
use ember::ConnectionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::Settings;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::reactor::Reactor;
use crate::support::{lock, Error};
use crate::tcp::client::{TcpClient, TcpClientHandler};

/// Callbacks of an HTTP client. All methods have no-op defaults.
pub trait HttpClientHandler: Send + Sync + 'static {
    fn on_connecting(&self, _client: &Arc<HttpClient>) {}
    fn on_connected(&self, _client: &Arc<HttpClient>) {}
    fn on_disconnected(&self, _client: &Arc<HttpClient>) {}
    /// The full header block of a response arrived.
    fn on_response_header(&self, _client: &Arc<HttpClient>, _response: &HttpResponse) {}
    /// A complete response arrived. Responses without `Content-Length` are
    /// delivered on disconnect with whatever accumulated.
    fn on_response(&self, _client: &Arc<HttpClient>, _response: &HttpResponse) {}
    /// The response was malformed; the client disconnects after this.
    fn on_response_error(&self, _client: &Arc<HttpClient>, _response: &HttpResponse, _error: &str) {}
    /// Raw bytes for a connection that left the HTTP protocol after an
    /// upgrade.
    fn on_upgraded_received(&self, _client: &Arc<HttpClient>, _data: &[u8]) {}
    fn on_sent(&self, _client: &Arc<HttpClient>, _sent: usize, _pending: usize) {}
    fn on_empty(&self, _client: &Arc<HttpClient>) {}
    fn on_error(&self, _client: &Arc<HttpClient>, _error: &Error) {}
}

/// Bridges the TCP client callbacks into the response parser.
struct Adapter {
    http: Weak<HttpClient>,
}

impl TcpClientHandler for Adapter {
    fn on_connecting(&self, _client: &Arc<TcpClient>) {
        if let Some(http) = self.http.upgrade() {
            http.handler.on_connecting(&http);
        }
    }

    fn on_connected(&self, _client: &Arc<TcpClient>) {
        if let Some(http) = self.http.upgrade() {
            lock(&http.response).clear();
            http.handler.on_connected(&http);
        }
    }

    fn on_disconnected(&self, _client: &Arc<TcpClient>) {
        let http = match self.http.upgrade() {
            Some(http) => http,
            None => return,
        };

        // EOF terminates a response body without a declared length
        let mut response = lock(&http.response);
        if response.is_pending_body() && !http.is_upgraded() {
            http.handler.on_response(&http, &response);
            response.clear();
        }
        drop(response);

        http.set_upgraded(false);
        http.handler.on_disconnected(&http);
    }

    fn on_received(&self, _client: &Arc<TcpClient>, data: &[u8]) -> usize {
        let http = match self.http.upgrade() {
            Some(http) => http,
            None => return data.len(),
        };

        http.receive(data);

        // The parser copies into its own cache, the whole chunk is handled
        data.len()
    }

    fn on_sent(&self, _client: &Arc<TcpClient>, sent: usize, pending: usize) {
        if let Some(http) = self.http.upgrade() {
            http.handler.on_sent(&http, sent, pending);
        }
    }

    fn on_empty(&self, _client: &Arc<TcpClient>) {
        if let Some(http) = self.http.upgrade() {
            http.handler.on_empty(&http);
        }
    }

    fn on_error(&self, _client: &Arc<TcpClient>, error: &Error) {
        if let Some(http) = self.http.upgrade() {
            http.handler.on_error(&http, error);
        }
    }
}

/// HTTP client on top of a TCP client: sends built requests and drives the
/// incremental response parser.
pub struct HttpClient {
    tcp: Arc<TcpClient>,
    response: Mutex<HttpResponse>,
    handler: Arc<dyn HttpClientHandler>,
    upgraded: AtomicBool,
    log: logging::Logger,
}

impl HttpClient {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reactor: &Reactor,
        settings: Settings,
        handler: Arc<dyn HttpClientHandler>,
        log: L,
    ) -> Arc<HttpClient> {
        let log = logging::child(log, logging::o!("unit" => "http_client"));

        Arc::new_cyclic(|this: &Weak<HttpClient>| {
            let adapter = Arc::new(Adapter { http: this.clone() });

            HttpClient {
                tcp: TcpClient::new(reactor, settings, adapter, &log),
                response: Mutex::new(HttpResponse::new()),
                handler,
                upgraded: AtomicBool::new(false),
                log,
            }
        })
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.tcp.id()
    }

    /// The underlying TCP client.
    #[inline]
    pub fn tcp(&self) -> &Arc<TcpClient> {
        &self.tcp
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.tcp.is_connected()
    }

    /// Leaves the HTTP protocol: subsequent bytes go to
    /// `on_upgraded_received` untouched.
    #[inline]
    pub fn set_upgraded(&self, upgraded: bool) {
        self.upgraded.store(upgraded, Ordering::Release);
    }

    #[inline]
    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }

    #[inline]
    pub fn connect(&self) -> bool {
        self.tcp.connect()
    }

    #[inline]
    pub fn connect_async(&self) -> bool {
        self.tcp.connect_async()
    }

    #[inline]
    pub fn disconnect(&self) -> bool {
        self.tcp.disconnect()
    }

    #[inline]
    pub fn reconnect(&self) -> bool {
        self.tcp.reconnect()
    }

    /// Appends raw bytes to the send pipeline. Returns the pending count.
    #[inline]
    pub fn send(&self, buffer: &[u8]) -> usize {
        self.tcp.send(buffer)
    }

    /// Sends the wire bytes of a built request.
    #[inline]
    pub fn send_request(&self, request: &HttpRequest) -> usize {
        self.send(request.cache())
    }

    /// Drives the response parser with a received chunk.
    fn receive(self: &Arc<Self>, data: &[u8]) {
        if self.is_upgraded() {
            self.handler.on_upgraded_received(self, data);
            return;
        }

        let mut response = lock(&self.response);
        let mut data = data;

        if response.is_pending_header() {
            if response.receive_header(data) {
                self.handler.on_response_header(self, &response);
            }
            data = &[];
        }

        if response.error() {
            logging::debug!(self.log, "malformed response"; "context" => "receive");

            self.handler.on_response_error(self, &response, "Invalid HTTP response!");
            response.clear();
            drop(response);
            self.tcp.disconnect();
            return;
        }

        if response.receive_body(data) {
            self.handler.on_response(self, &response);
            response.clear();
        }
    }
}

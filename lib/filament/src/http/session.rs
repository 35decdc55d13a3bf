use ember::logging;
use ember::ConnectionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::http::cache::ContentCache;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::support::{lock, Error};
use crate::tcp::session::{TcpSession, TcpSessionHandler};

/// Callbacks of an HTTP server session. All methods have no-op defaults.
pub trait HttpSessionHandler: Send + Sync + 'static {
    fn on_connected(&self, _session: &Arc<HttpSession>) {}
    fn on_disconnected(&self, _session: &Arc<HttpSession>) {}
    /// The full header block of a request arrived; the body may still be
    /// streaming in.
    fn on_request_header(&self, _session: &Arc<HttpSession>, _request: &HttpRequest) {}
    /// A complete request arrived.
    fn on_request(&self, _session: &Arc<HttpSession>, _request: &HttpRequest) {}
    /// A GET was answered from the server content cache.
    fn on_cached_request(&self, _session: &Arc<HttpSession>, _request: &HttpRequest, _response: &[u8]) {
    }
    /// The request was malformed; the session disconnects after this.
    fn on_request_error(&self, _session: &Arc<HttpSession>, _request: &HttpRequest, _error: &str) {}
    /// Raw bytes for a session that left the HTTP protocol after an
    /// upgrade.
    fn on_upgraded_received(&self, _session: &Arc<HttpSession>, _data: &[u8]) {}
    fn on_sent(&self, _session: &Arc<HttpSession>, _sent: usize, _pending: usize) {}
    fn on_empty(&self, _session: &Arc<HttpSession>) {}
    fn on_error(&self, _session: &Arc<HttpSession>, _error: &Error) {}
}

/// HTTP session on top of a TCP session: drives the incremental request
/// parser over received chunks and answers cached GETs directly.
pub struct HttpSession {
    this: Weak<HttpSession>,
    tcp: Mutex<Weak<TcpSession>>,
    request: Mutex<HttpRequest>,
    cache: Arc<ContentCache>,
    handler: Arc<dyn HttpSessionHandler>,
    /// Once set, received bytes bypass the request parser.
    upgraded: AtomicBool,
    log: logging::Logger,
}

impl HttpSession {
    pub(crate) fn create<'a, L: Into<Option<&'a logging::Logger>>>(
        cache: Arc<ContentCache>,
        handler: Arc<dyn HttpSessionHandler>,
        log: L,
    ) -> Arc<HttpSession> {
        let log = logging::child(log, logging::o!("unit" => "http_session"));

        Arc::new_cyclic(|this| HttpSession {
            this: this.clone(),
            tcp: Mutex::new(Weak::new()),
            request: Mutex::new(HttpRequest::new()),
            cache,
            handler,
            upgraded: AtomicBool::new(false),
            log,
        })
    }

    /// The underlying TCP session, while connected.
    #[inline]
    pub fn tcp(&self) -> Option<Arc<TcpSession>> {
        lock(&self.tcp).upgrade()
    }

    /// The server content cache this session serves GETs from.
    #[inline]
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    #[inline]
    pub fn id(&self) -> Option<ConnectionId> {
        self.tcp().map(|tcp| tcp.id())
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.tcp().map(|tcp| tcp.is_connected()).unwrap_or(false)
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

    /// Appends raw bytes to the send pipeline. Returns the pending count.
    pub fn send(&self, buffer: &[u8]) -> usize {
        match self.tcp() {
            Some(tcp) => tcp.send(buffer),
            None => 0,
        }
    }

    /// Sends the wire bytes of a built response.
    #[inline]
    pub fn send_response(&self, response: &HttpResponse) -> usize {
        self.send(response.cache())
    }

    pub fn disconnect(&self) -> bool {
        match self.tcp() {
            Some(tcp) => tcp.disconnect(),
            None => false,
        }
    }

    fn this(&self) -> Option<Arc<HttpSession>> {
        self.this.upgrade()
    }

    /// Answers a completed request: cached GETs are served directly,
    /// everything else goes to the handler.
    fn serve(&self, session: &Arc<HttpSession>, request: &HttpRequest) {
        if request.method() == "GET" && !self.is_upgraded() {
            if let Some(cached) = self.cache.find(request.url_path()) {
                logging::debug!(self.log, "request served from cache";
                                "context" => "serve",
                                "url" => request.url_path());

                self.send(&cached);
                self.handler.on_cached_request(session, request, &cached);
                return;
            }
        }

        self.handler.on_request(session, request);
    }
}

impl TcpSessionHandler for HttpSession {
    fn on_connected(&self, session: &Arc<TcpSession>) {
        *lock(&self.tcp) = Arc::downgrade(session);

        if let Some(this) = self.this() {
            self.handler.on_connected(&this);
        }
    }

    fn on_disconnected(&self, _session: &Arc<TcpSession>) {
        let this = match self.this() {
            Some(this) => this,
            None => return,
        };

        // A body pending at EOF counts as complete with whatever arrived
        let mut request = lock(&self.request);
        if request.is_pending_body() && !self.is_upgraded() {
            self.serve(&this, &request);
            request.clear();
        }
        drop(request);

        self.set_upgraded(false);
        self.handler.on_disconnected(&this);
    }

    fn on_received(&self, _session: &Arc<TcpSession>, data: &[u8]) {
        let this = match self.this() {
            Some(this) => this,
            None => return,
        };

        if self.is_upgraded() {
            self.handler.on_upgraded_received(&this, data);
            return;
        }

        let mut request = lock(&self.request);
        let mut data = data;

        // Header phase first; whatever is left feeds the body phase
        if request.is_pending_header() {
            if request.receive_header(data) {
                self.handler.on_request_header(&this, &request);
            }
            data = &[];
        }

        if request.error() {
            logging::debug!(self.log, "malformed request"; "context" => "receive");

            self.handler.on_request_error(&this, &request, "Invalid HTTP request!");
            request.clear();
            drop(request);
            self.disconnect();
            return;
        }

        if request.receive_body(data) {
            self.serve(&this, &request);
            request.clear();
        }
    }

    fn on_sent(&self, _session: &Arc<TcpSession>, sent: usize, pending: usize) {
        if let Some(this) = self.this() {
            self.handler.on_sent(&this, sent, pending);
        }
    }

    fn on_empty(&self, _session: &Arc<TcpSession>) {
        if let Some(this) = self.this() {
            self.handler.on_empty(&this);
        }
    }

    fn on_error(&self, _session: &Arc<TcpSession>, error: &Error) {
        if let Some(this) = self.this() {
            self.handler.on_error(&this, error);
        }
    }
}

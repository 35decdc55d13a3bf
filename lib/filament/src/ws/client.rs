use ember::logging;
use ember::ConnectionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::Settings;
use crate::http::client::{HttpClient, HttpClientHandler};
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::reactor::Reactor;
use crate::support::{lock, Error};
use crate::ws::engine::{WsEngine, WsEvent};
use crate::ws::frame::{prepare_frame, OpCode};
use crate::ws::handshake;
use crate::ws::{CLOSE_STATUS_PROTOCOL_ERROR, WS_BINARY, WS_CLOSE, WS_FIN, WS_PING, WS_PONG, WS_TEXT};

/// Callbacks of a WebSocket client. All methods have defaults; the
/// default upgrade request carries the minimum viable headers with a
/// fresh random key, and pings are answered with pongs.
pub trait WsClientHandler: Send + Sync + 'static {
    /// Fill the upgrade request before it is sent. Applications add
    /// `Origin`, `Sec-WebSocket-Protocol` or a custom key here.
    fn on_ws_connecting(&self, client: &Arc<WsClient>, request: &mut HttpRequest) {
        handshake::fill_upgrade_request(request, &client.host(), "/", &handshake::generate_key());
    }
    /// TCP connected; the upgrade request is on its way.
    fn on_connected(&self, _client: &Arc<WsClient>) {}
    /// The 101 response validated; frames flow from here on.
    fn on_ws_connected(&self, _client: &Arc<WsClient>, _response: &HttpResponse) {}
    /// Fires exactly once when an upgraded connection goes away.
    fn on_ws_disconnected(&self, _client: &Arc<WsClient>) {}
    fn on_disconnected(&self, _client: &Arc<WsClient>) {}
    /// A complete data message, reassembled across fragments.
    fn on_ws_received(&self, _client: &Arc<WsClient>, _opcode: OpCode, _data: &[u8]) {}
    fn on_ws_ping(&self, client: &Arc<WsClient>, data: &[u8]) {
        client.send_pong(data);
    }
    fn on_ws_pong(&self, _client: &Arc<WsClient>, _data: &[u8]) {}
    /// Peer initiated or acknowledged a close; teardown follows.
    fn on_ws_close(&self, _client: &Arc<WsClient>, _status: u16, _reason: &[u8]) {}
    fn on_ws_error(&self, _client: &Arc<WsClient>, _message: &str) {}
    fn on_error(&self, _client: &Arc<WsClient>, _error: &Error) {}
}

/// Bridges the HTTP client callbacks into the WebSocket state machine.
struct Adapter {
    ws: Weak<WsClient>,
}

impl HttpClientHandler for Adapter {
    fn on_connected(&self, _client: &Arc<HttpClient>) {
        let ws = match self.ws.upgrade() {
            Some(ws) => ws,
            None => return,
        };

        lock(&ws.engine).clear();
        ws.close_sent.store(false, Ordering::Release);

        // Hand the upgrade request to the application, then send it
        {
            let mut request = lock(&ws.request);
            request.clear();
            ws.handler.on_ws_connecting(&ws, &mut request);
            request.set_body(&[]);
            ws.http.send_request(&request);
        }

        ws.handler.on_connected(&ws);
    }

    fn on_disconnected(&self, _client: &Arc<HttpClient>) {
        let ws = match self.ws.upgrade() {
            Some(ws) => ws,
            None => return,
        };

        if ws.handshaked.swap(false, Ordering::AcqRel) {
            ws.handler.on_ws_disconnected(&ws);
        }

        lock(&ws.engine).clear();
        lock(&ws.request).clear();
        ws.close_sent.store(false, Ordering::Release);

        ws.handler.on_disconnected(&ws);
    }

    fn on_response_header(&self, _client: &Arc<HttpClient>, response: &HttpResponse) {
        let ws = match self.ws.upgrade() {
            Some(ws) => ws,
            None => return,
        };

        if ws.is_handshaked() {
            return;
        }

        let request = lock(&ws.request);
        let key = request.find_header("Sec-WebSocket-Key").unwrap_or("");

        match handshake::validate_upgrade_response(response, key) {
            Ok(()) => {
                drop(request);

                ws.handshaked.store(true, Ordering::Release);
                ws.http.set_upgraded(true);

                logging::debug!(ws.log, "websocket upgraded"; "context" => "upgrade");

                ws.handler.on_ws_connected(&ws, response);
            }
            Err(message) => {
                drop(request);

                logging::debug!(ws.log, "websocket upgrade failed";
                                "context" => "upgrade",
                                "reason" => message);

                ws.handler.on_ws_error(&ws, message);
                ws.http.disconnect();
            }
        }
    }

    fn on_response(&self, _client: &Arc<HttpClient>, response: &HttpResponse) {
        let ws = match self.ws.upgrade() {
            Some(ws) => ws,
            None => return,
        };

        // Frames may ride in the same segment as the 101 response
        if ws.is_handshaked() {
            ws.process(response.body());
        }
    }

    fn on_response_error(&self, _client: &Arc<HttpClient>, _response: &HttpResponse, error: &str) {
        if let Some(ws) = self.ws.upgrade() {
            ws.handler.on_ws_error(&ws, error);
        }
    }

    fn on_upgraded_received(&self, _client: &Arc<HttpClient>, data: &[u8]) {
        if let Some(ws) = self.ws.upgrade() {
            ws.process(data);
        }
    }

    fn on_error(&self, _client: &Arc<HttpClient>, error: &Error) {
        if let Some(ws) = self.ws.upgrade() {
            ws.handler.on_error(&ws, error);
        }
    }
}

/// WebSocket client on an HTTP client: sends the upgrade request on
/// connect, validates the 101 and then runs the frame engine. Client side
/// frames are masked with a fresh key each.
pub struct WsClient {
    this: Weak<WsClient>,
    http: Arc<HttpClient>,
    request: Mutex<HttpRequest>,
    handler: Arc<dyn WsClientHandler>,
    handshaked: AtomicBool,
    engine: Mutex<WsEngine>,
    close_sent: AtomicBool,
    log: logging::Logger,
}

impl WsClient {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reactor: &Reactor,
        settings: Settings,
        handler: Arc<dyn WsClientHandler>,
        log: L,
    ) -> Arc<WsClient> {
        let log = logging::child(log, logging::o!("unit" => "ws_client"));

        Arc::new_cyclic(|this: &Weak<WsClient>| {
            let adapter = Arc::new(Adapter { ws: this.clone() });

            WsClient {
                this: this.clone(),
                http: HttpClient::new(reactor, settings, adapter, &log),
                request: Mutex::new(HttpRequest::new()),
                handler,
                handshaked: AtomicBool::new(false),
                engine: Mutex::new(WsEngine::new()),
                close_sent: AtomicBool::new(false),
                log,
            }
        })
    }

    /// The underlying HTTP client.
    #[inline]
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.http.id()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.http.is_connected()
    }

    #[inline]
    pub fn is_handshaked(&self) -> bool {
        self.handshaked.load(Ordering::Acquire)
    }

    /// The `host:port` this client connects to, for the `Host` header.
    pub fn host(&self) -> String {
        let settings = self.http.tcp().settings();
        format!("{}:{}", settings.address, settings.port)
    }

    #[inline]
    pub fn connect(&self) -> bool {
        self.http.connect()
    }

    #[inline]
    pub fn connect_async(&self) -> bool {
        self.http.connect_async()
    }

    #[inline]
    pub fn disconnect(&self) -> bool {
        self.http.disconnect()
    }

    #[inline]
    pub fn reconnect(&self) -> bool {
        self.http.reconnect()
    }

    pub fn send_text(&self, data: &[u8]) -> usize {
        self.send_frame(WS_FIN | WS_TEXT, data)
    }

    pub fn send_binary(&self, data: &[u8]) -> usize {
        self.send_frame(WS_FIN | WS_BINARY, data)
    }

    pub fn send_ping(&self, data: &[u8]) -> usize {
        self.send_frame(WS_FIN | WS_PING, data)
    }

    pub fn send_pong(&self, data: &[u8]) -> usize {
        self.send_frame(WS_FIN | WS_PONG, data)
    }

    /// Sends a CLOSE with the status code prefixed to the reason bytes.
    pub fn send_close(&self, status: u16, reason: &[u8]) -> usize {
        if !self.is_handshaked() {
            return 0;
        }

        self.close_sent.store(true, Ordering::Release);

        let frame = prepare_frame(WS_FIN | WS_CLOSE, true, reason, Some(status));
        self.http.send(&frame)
    }

    /// Initiates the closing handshake; the connection tears down once
    /// the peer echoes the CLOSE.
    #[inline]
    pub fn close(&self, status: u16) -> usize {
        self.send_close(status, &[])
    }

    fn send_frame(&self, header: u8, data: &[u8]) -> usize {
        if !self.is_handshaked() {
            return 0;
        }

        let frame = prepare_frame(header, true, data, None);
        self.http.send(&frame)
    }

    fn this(&self) -> Option<Arc<WsClient>> {
        self.this.upgrade()
    }

    fn process(&self, data: &[u8]) {
        let this = match self.this() {
            Some(this) => this,
            None => return,
        };

        let mut events = Vec::new();
        lock(&self.engine).feed(data, &mut events);

        for event in events {
            match event {
                WsEvent::Message(opcode, data) => self.handler.on_ws_received(&this, opcode, &data),
                WsEvent::Ping(data) => self.handler.on_ws_ping(&this, &data),
                WsEvent::Pong(data) => self.handler.on_ws_pong(&this, &data),
                WsEvent::CloseReceived(status, reason) => {
                    self.handler.on_ws_close(&this, status, &reason);

                    // Echo the CLOSE unless this end already sent one
                    if !self.close_sent.swap(true, Ordering::AcqRel) {
                        let frame = prepare_frame(WS_FIN | WS_CLOSE, true, &reason, Some(status));
                        self.http.send(&frame);
                    }

                    self.http.disconnect();
                }
                WsEvent::Error(message) => {
                    self.handler.on_ws_error(&this, message);

                    if !self.close_sent.swap(true, Ordering::AcqRel) {
                        let frame =
                            prepare_frame(WS_FIN | WS_CLOSE, true, &[], Some(CLOSE_STATUS_PROTOCOL_ERROR));
                        self.http.send(&frame);
                    }

                    self.http.disconnect();
                }
            }
        }
    }
}

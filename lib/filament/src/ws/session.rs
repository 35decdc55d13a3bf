use ember::logging;
use ember::ConnectionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::session::{HttpSession, HttpSessionHandler};
use crate::support::{lock, Error};
use crate::ws::engine::{WsEngine, WsEvent};
use crate::ws::frame::{prepare_frame, OpCode};
use crate::ws::handshake;
use crate::ws::{CLOSE_STATUS_PROTOCOL_ERROR, WS_BINARY, WS_CLOSE, WS_FIN, WS_PING, WS_PONG, WS_TEXT};

/// Callbacks of a server side WebSocket session. All methods have
/// defaults; pings are answered with pongs unless overridden.
pub trait WsSessionHandler: Send + Sync + 'static {
    /// TCP connected; the upgrade has not happened yet.
    fn on_connected(&self, _session: &Arc<WsSession>) {}
    /// The upgrade completed; frames flow from here on.
    fn on_ws_connected(&self, _session: &Arc<WsSession>, _request: &HttpRequest) {}
    /// Fires exactly once when an upgraded session goes away.
    fn on_ws_disconnected(&self, _session: &Arc<WsSession>) {}
    fn on_disconnected(&self, _session: &Arc<WsSession>) {}
    /// A complete data message, reassembled across fragments.
    fn on_ws_received(&self, _session: &Arc<WsSession>, _opcode: OpCode, _data: &[u8]) {}
    fn on_ws_ping(&self, session: &Arc<WsSession>, data: &[u8]) {
        session.send_pong(data);
    }
    fn on_ws_pong(&self, _session: &Arc<WsSession>, _data: &[u8]) {}
    /// Peer initiated or acknowledged a close; teardown follows.
    fn on_ws_close(&self, _session: &Arc<WsSession>, _status: u16, _reason: &[u8]) {}
    fn on_ws_error(&self, _session: &Arc<WsSession>, _message: &str) {}
    fn on_error(&self, _session: &Arc<WsSession>, _error: &Error) {}
}

/// WebSocket session on an HTTP session: answers the upgrade, then runs
/// the frame engine over the raw byte stream. Server side frames go out
/// unmasked.
pub struct WsSession {
    this: Weak<WsSession>,
    http: Mutex<Weak<HttpSession>>,
    handler: Arc<dyn WsSessionHandler>,
    handshaked: AtomicBool,
    engine: Mutex<WsEngine>,
    close_sent: AtomicBool,
    log: logging::Logger,
}

impl WsSession {
    pub(crate) fn create<'a, L: Into<Option<&'a logging::Logger>>>(
        handler: Arc<dyn WsSessionHandler>,
        log: L,
    ) -> Arc<WsSession> {
        let log = logging::child(log, logging::o!("unit" => "ws_session"));

        Arc::new_cyclic(|this| WsSession {
            this: this.clone(),
            http: Mutex::new(Weak::new()),
            handler,
            handshaked: AtomicBool::new(false),
            engine: Mutex::new(WsEngine::new()),
            close_sent: AtomicBool::new(false),
            log,
        })
    }

    /// The underlying HTTP session, while connected.
    #[inline]
    pub fn http(&self) -> Option<Arc<HttpSession>> {
        lock(&self.http).upgrade()
    }

    #[inline]
    pub fn id(&self) -> Option<ConnectionId> {
        self.http().and_then(|http| http.id())
    }

    #[inline]
    pub fn is_handshaked(&self) -> bool {
        self.handshaked.load(Ordering::Acquire)
    }

    pub fn disconnect(&self) -> bool {
        match self.http() {
            Some(http) => http.disconnect(),
            None => false,
        }
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

        let frame = prepare_frame(WS_FIN | WS_CLOSE, false, reason, Some(status));
        match self.http() {
            Some(http) => http.send(&frame),
            None => 0,
        }
    }

    /// Initiates the closing handshake; the session tears down once the
    /// peer echoes the CLOSE.
    #[inline]
    pub fn close(&self, status: u16) -> usize {
        self.send_close(status, &[])
    }

    fn send_frame(&self, header: u8, data: &[u8]) -> usize {
        if !self.is_handshaked() {
            return 0;
        }

        let frame = prepare_frame(header, false, data, None);
        match self.http() {
            Some(http) => http.send(&frame),
            None => 0,
        }
    }

    fn this(&self) -> Option<Arc<WsSession>> {
        self.this.upgrade()
    }

    fn upgrade(&self, this: &Arc<WsSession>, http: &Arc<HttpSession>, request: &HttpRequest) {
        match handshake::validate_upgrade_request(request) {
            Ok(key) => {
                let mut response = HttpResponse::new();
                handshake::build_upgrade_response(&mut response, key);
                http.send_response(&response);

                lock(&self.engine).clear();
                self.close_sent.store(false, Ordering::Release);
                self.handshaked.store(true, Ordering::Release);
                http.set_upgraded(true);

                logging::debug!(self.log, "websocket upgraded"; "context" => "upgrade");

                self.handler.on_ws_connected(this, request);
            }
            Err(message) => {
                logging::debug!(self.log, "websocket upgrade rejected";
                                "context" => "upgrade",
                                "reason" => message);

                self.handler.on_ws_error(this, message);
                http.disconnect();
            }
        }
    }

    fn process(&self, this: &Arc<WsSession>, data: &[u8]) {
        let mut events = Vec::new();
        lock(&self.engine).feed(data, &mut events);

        for event in events {
            match event {
                WsEvent::Message(opcode, data) => self.handler.on_ws_received(this, opcode, &data),
                WsEvent::Ping(data) => self.handler.on_ws_ping(this, &data),
                WsEvent::Pong(data) => self.handler.on_ws_pong(this, &data),
                WsEvent::CloseReceived(status, reason) => {
                    self.handler.on_ws_close(this, status, &reason);

                    // Echo the CLOSE unless this end already sent one
                    if !self.close_sent.swap(true, Ordering::AcqRel) {
                        let frame = prepare_frame(WS_FIN | WS_CLOSE, false, &reason, Some(status));
                        if let Some(http) = self.http() {
                            http.send(&frame);
                        }
                    }

                    self.disconnect();
                }
                WsEvent::Error(message) => {
                    self.handler.on_ws_error(this, message);

                    if !self.close_sent.swap(true, Ordering::AcqRel) {
                        let frame =
                            prepare_frame(WS_FIN | WS_CLOSE, false, &[], Some(CLOSE_STATUS_PROTOCOL_ERROR));
                        if let Some(http) = self.http() {
                            http.send(&frame);
                        }
                    }

                    self.disconnect();
                }
            }
        }
    }
}

impl HttpSessionHandler for WsSession {
    fn on_connected(&self, session: &Arc<HttpSession>) {
        *lock(&self.http) = Arc::downgrade(session);

        if let Some(this) = self.this() {
            self.handler.on_connected(&this);
        }
    }

    fn on_disconnected(&self, _session: &Arc<HttpSession>) {
        let this = match self.this() {
            Some(this) => this,
            None => return,
        };

        if self.handshaked.swap(false, Ordering::AcqRel) {
            self.handler.on_ws_disconnected(&this);
        }

        lock(&self.engine).clear();
        self.close_sent.store(false, Ordering::Release);

        self.handler.on_disconnected(&this);
    }

    fn on_request_header(&self, session: &Arc<HttpSession>, request: &HttpRequest) {
        if self.is_handshaked() {
            return;
        }

        if let Some(this) = self.this() {
            self.upgrade(&this, session, request);
        }
    }

    fn on_request(&self, _session: &Arc<HttpSession>, request: &HttpRequest) {
        if !self.is_handshaked() {
            return;
        }

        // Frames may ride in the same segment as the upgrade request
        if let Some(this) = self.this() {
            self.process(&this, request.body());
        }
    }

    fn on_request_error(&self, _session: &Arc<HttpSession>, _request: &HttpRequest, error: &str) {
        if let Some(this) = self.this() {
            self.handler.on_ws_error(&this, error);
        }
    }

    fn on_upgraded_received(&self, _session: &Arc<HttpSession>, data: &[u8]) {
        if let Some(this) = self.this() {
            self.process(&this, data);
        }
    }

    fn on_error(&self, _session: &Arc<HttpSession>, error: &Error) {
        if let Some(this) = self.this() {
            self.handler.on_error(&this, error);
        }
    }
}
